//! `/c_screenshot`: a text snapshot of the pane with a key-relay keyboard.
//!
//! The keyboard sends navigation keys straight into the window and refreshes
//! the snapshot in place, which is enough to drive Claude's menus from chat.

use std::sync::Arc;

use tracing::warn;

use tramuntana_core::callback::format_ss;
use tramuntana_core::terminal;
use tramuntana_core::text::{MESSAGE_LIMIT, truncate_tail};

use crate::bot::Bot;
use crate::telegram::{CallbackQuery, InlineKeyboardButton, InlineKeyboardMarkup, Message, User};
use crate::tmux;

/// Callback action → tmux key name.
pub(crate) fn ss_key_for_action(action: &str) -> Option<&'static str> {
    match action {
        "up" => Some("Up"),
        "down" => Some("Down"),
        "left" => Some("Left"),
        "right" => Some("Right"),
        "space" => Some("Space"),
        "tab" => Some("Tab"),
        "esc" => Some("Escape"),
        "enter" => Some("Enter"),
        _ => None,
    }
}

/// Arrows; Space/Tab/Esc/Enter; Refresh.
pub(crate) fn build_screenshot_keyboard(window_id: &str) -> InlineKeyboardMarkup {
    let key = |label: &str, action: &str| {
        InlineKeyboardButton::callback(label, format_ss(action, window_id))
    };
    InlineKeyboardMarkup::new(vec![
        vec![key("←", "left"), key("↑", "up"), key("↓", "down"), key("→", "right")],
        vec![key("Space", "space"), key("Tab", "tab"), key("Esc", "esc"), key("Enter", "enter")],
        vec![key("Refresh", "refresh")],
    ])
}

impl Bot {
    pub(crate) async fn handle_screenshot_command(self: &Arc<Self>, msg: &Message, user: &User) {
        let chat_id = msg.chat.id;
        let thread_id = msg.thread_id();

        let Some(window_id) = self.resolve_window(user.id, thread_id) else {
            self.reply(chat_id, thread_id, "Topic not bound to a session.").await;
            return;
        };

        let Some(snapshot) = self.capture_snapshot(msg, user, &window_id).await else {
            return;
        };

        let keyboard = build_screenshot_keyboard(&window_id);
        match self
            .send_with_keyboard(chat_id, thread_id, &snapshot, &keyboard)
            .await
        {
            Ok(sent) => {
                self.screenshot_messages
                    .lock()
                    .expect("screenshot lock")
                    .insert((user.id, thread_id), sent.message_id);
            }
            Err(err) => warn!("error sending screenshot: {}", err),
        }
    }

    pub(crate) async fn handle_screenshot_callback(self: &Arc<Self>, cq: &CallbackQuery, data: &str) {
        let Some((action, window_id)) = tramuntana_core::callback::parse_ss(data) else {
            return;
        };
        let Some(message) = &cq.message else {
            return;
        };
        let window_id = window_id.to_string();

        if let Some(key) = ss_key_for_action(action) {
            if let Err(err) =
                tmux::send_special_key(&self.config.tmux_session_name, &window_id, key)
            {
                if err.is_window_dead() {
                    self.cleanup_dead_window(&window_id);
                    self.edit_message(message.chat.id, message.message_id, "Session died.").await;
                    return;
                }
                warn!("error sending {} to {}: {}", key, window_id, err);
            }
            // Give the UI a beat to react before re-capturing.
            tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        } else if action != "refresh" {
            return;
        }

        match tmux::capture_pane(&self.config.tmux_session_name, &window_id, false) {
            Ok(pane) => {
                let snapshot = render_snapshot(&pane);
                let keyboard = build_screenshot_keyboard(&window_id);
                self.edit_message_with_keyboard(
                    message.chat.id,
                    message.message_id,
                    &snapshot,
                    &keyboard,
                )
                .await;
            }
            Err(err) if err.is_window_dead() => {
                self.cleanup_dead_window(&window_id);
                self.edit_message(message.chat.id, message.message_id, "Session died.").await;
            }
            Err(err) => warn!("error capturing {}: {}", window_id, err),
        }
    }

    async fn capture_snapshot(
        self: &Arc<Self>,
        msg: &Message,
        user: &User,
        window_id: &str,
    ) -> Option<String> {
        match tmux::capture_pane(&self.config.tmux_session_name, window_id, false) {
            Ok(pane) => Some(render_snapshot(&pane)),
            Err(err) if err.is_window_dead() => {
                self.handle_dead_window_interactive(msg, user, window_id, "").await;
                None
            }
            Err(err) => {
                warn!("error capturing {}: {}", window_id, err);
                self.reply(msg.chat.id, msg.thread_id(), "Error: failed to capture terminal.")
                    .await;
                None
            }
        }
    }
}

fn render_snapshot(pane: &str) -> String {
    let shortened = terminal::shorten_separators(pane);
    let trimmed = shortened.trim_end();
    if trimmed.is_empty() {
        "(empty terminal)".to_string()
    } else {
        truncate_tail(trimmed, MESSAGE_LIMIT)
    }
}
