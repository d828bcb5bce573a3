//! Interactive-prompt relay.
//!
//! When Claude draws an interactive UI (plan review, question, permission
//! prompt), the pane content is mirrored into the topic with a `nav_*`
//! keyboard whose buttons press the corresponding keys in the window.

use std::sync::Arc;

use tracing::warn;

use tramuntana_core::terminal;
use tramuntana_core::text::{MESSAGE_LIMIT, truncate_tail};

use crate::bot::Bot;
use crate::telegram::{CallbackQuery, InlineKeyboardButton, InlineKeyboardMarkup};
use crate::tmux;

/// An interactive prompt mirrored into chat; `message_id` is the keyboard
/// message being edited in place.
#[derive(Debug, Clone)]
pub(crate) struct InteractiveUI {
    pub name: String,
    pub window_id: String,
    pub message_id: i64,
    pub chat_id: i64,
}

/// Pane content of an interactive prompt, as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct UiContent {
    pub name: String,
    pub content: String,
}

/// Human header for a UI kind.
fn ui_display_name(name: &str) -> &'static str {
    match name {
        "ExitPlanMode" => "Plan Review",
        name if name.starts_with("AskUserQuestion") => "Question",
        "PermissionPrompt" => "Permission",
        "RestoreCheckpoint" => "Restore",
        "Settings" => "Settings",
        _ => "Prompt",
    }
}

/// `[Plan Review]\n<content>`.
pub(crate) fn format_interactive_content(ui: &UiContent) -> String {
    format!("[{}]\n{}", ui_display_name(&ui.name), ui.content)
}

/// Full keyboard: arrows; Space/Tab/Esc/Enter; Refresh. Checkpoint restore
/// only navigates a list, so it gets Up/Down plus the action row.
pub(crate) fn build_interactive_keyboard(name: &str) -> InlineKeyboardMarkup {
    let key = |label: &str, action: &str| {
        InlineKeyboardButton::callback(label, format!("nav_{action}"))
    };

    if name == "RestoreCheckpoint" {
        return InlineKeyboardMarkup::new(vec![
            vec![key("↑", "up"), key("↓", "down")],
            vec![key("Esc", "esc"), key("Enter", "enter"), key("Refresh", "refresh")],
        ]);
    }

    InlineKeyboardMarkup::new(vec![
        vec![key("←", "left"), key("↑", "up"), key("↓", "down"), key("→", "right")],
        vec![key("Space", "space"), key("Tab", "tab"), key("Esc", "esc"), key("Enter", "enter")],
        vec![key("Refresh", "refresh")],
    ])
}

impl Bot {
    /// Mirror an interactive prompt into the topic (or refresh the existing
    /// mirror). Called by the monitor when a tool_use announces one.
    pub(crate) async fn show_interactive_ui(
        self: &Arc<Self>,
        user_id: i64,
        chat_id: i64,
        thread_id: i64,
        window_id: &str,
        ui_name: &str,
    ) {
        let pane = match tmux::capture_pane(&self.config.tmux_session_name, window_id, false) {
            Ok(pane) => pane,
            Err(err) => {
                warn!("interactive: capture failed for {}: {}", window_id, err);
                return;
            }
        };

        let content = UiContent {
            name: ui_name.to_string(),
            content: truncate_tail(terminal::strip_pane_chrome(&pane).trim_end(), MESSAGE_LIMIT),
        };
        let text = format_interactive_content(&content);
        let keyboard = build_interactive_keyboard(ui_name);

        let existing = self
            .interactive_uis
            .lock()
            .expect("interactive lock")
            .get(&(user_id, thread_id))
            .cloned();

        match existing {
            Some(ui) => {
                self.edit_message_with_keyboard(ui.chat_id, ui.message_id, &text, &keyboard)
                    .await;
            }
            None => match self.send_with_keyboard(chat_id, thread_id, &text, &keyboard).await {
                Ok(sent) => {
                    self.interactive_uis.lock().expect("interactive lock").insert(
                        (user_id, thread_id),
                        InteractiveUI {
                            name: ui_name.to_string(),
                            window_id: window_id.to_string(),
                            message_id: sent.message_id,
                            chat_id,
                        },
                    );
                }
                Err(err) => warn!("interactive: send failed: {}", err),
            },
        }
    }

    /// `nav_*` keys press into the window owning the user's interactive UI.
    pub(crate) async fn handle_interactive_callback(self: &Arc<Self>, cq: &CallbackQuery, data: &str) {
        let Some(action) = data.strip_prefix("nav_") else {
            return;
        };
        let Some(message) = &cq.message else {
            return;
        };
        let thread_id = message.thread_id();

        let Some(ui) = self
            .interactive_uis
            .lock()
            .expect("interactive lock")
            .get(&(cq.from.id, thread_id))
            .cloned()
        else {
            return;
        };

        if let Some(key) = super::screenshot::ss_key_for_action(action) {
            if let Err(err) =
                tmux::send_special_key(&self.config.tmux_session_name, &ui.window_id, key)
            {
                if err.is_window_dead() {
                    self.cleanup_dead_window(&ui.window_id);
                    self.clear_user_ui_state(cq.from.id, thread_id);
                    self.edit_message(ui.chat_id, ui.message_id, "Session died.").await;
                    return;
                }
                warn!("interactive: error sending {}: {}", key, err);
                return;
            }

            // Enter or Escape usually dismisses the prompt; drop the mirror.
            if matches!(action, "enter" | "esc") {
                self.interactive_uis
                    .lock()
                    .expect("interactive lock")
                    .remove(&(cq.from.id, thread_id));
                self.edit_message(ui.chat_id, ui.message_id, "Answered.").await;
                return;
            }

            tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        } else if action != "refresh" {
            return;
        }

        match tmux::capture_pane(&self.config.tmux_session_name, &ui.window_id, false) {
            Ok(pane) => {
                let content = UiContent {
                    name: ui.name.clone(),
                    content: truncate_tail(
                        terminal::strip_pane_chrome(&pane).trim_end(),
                        MESSAGE_LIMIT,
                    ),
                };
                let keyboard = build_interactive_keyboard(&ui.name);
                self.edit_message_with_keyboard(
                    ui.chat_id,
                    ui.message_id,
                    &format_interactive_content(&content),
                    &keyboard,
                )
                .await;
            }
            Err(err) => warn!("interactive: capture failed: {}", err),
        }
    }
}
