//! Window picker for unbound topics.

use std::sync::Arc;

use tracing::warn;

use tramuntana_core::text::truncate;

use crate::bot::directory_browser::BrowseState;
use crate::bot::{Bot, synthetic_message};
use crate::telegram::{CallbackQuery, InlineKeyboardButton, InlineKeyboardMarkup};
use crate::tmux::Window;

const BUTTON_LABEL_CHARS: usize = 30;

/// Build the picker text and keyboard: windows two per row, then a
/// New Session / Cancel action row. Buttons reference windows by index into
/// the stored picker state, keeping callback data tiny.
pub(crate) fn build_window_picker(windows: &[Window]) -> (String, InlineKeyboardMarkup) {
    let mut lines = vec!["Pick a session for this topic:".to_string()];
    for (i, w) in windows.iter().enumerate() {
        lines.push(format!("{}. {} — {}", i + 1, w.name, w.cwd));
    }

    let mut rows: Vec<Vec<InlineKeyboardButton>> = Vec::new();
    for (i, w) in windows.iter().enumerate() {
        let label = truncate(&w.name, BUTTON_LABEL_CHARS);
        let button = InlineKeyboardButton::callback(label, format!("win_bind:{i}"));
        if i % 2 == 0 {
            rows.push(vec![button]);
        } else if let Some(row) = rows.last_mut() {
            row.push(button);
        }
    }
    rows.push(vec![
        InlineKeyboardButton::callback("New Session", "win_new"),
        InlineKeyboardButton::callback("Cancel", "win_cancel"),
    ]);

    (lines.join("\n"), InlineKeyboardMarkup::new(rows))
}

impl Bot {
    pub(crate) async fn show_window_picker(
        self: &Arc<Self>,
        chat_id: i64,
        thread_id: i64,
        user_id: i64,
        windows: Vec<Window>,
        pending_text: &str,
    ) {
        let (text, keyboard) = build_window_picker(&windows);

        let sent = match self.send_with_keyboard(chat_id, thread_id, &text, &keyboard).await {
            Ok(sent) => sent,
            Err(err) => {
                warn!("error sending window picker: {}", err);
                return;
            }
        };

        self.browse_states.lock().expect("browse lock").insert(
            user_id,
            BrowseState {
                current_path: String::new(),
                page: 0,
                windows,
                entries: Vec::new(),
                pending_text: pending_text.to_string(),
                message_id: sent.message_id,
                chat_id,
                thread_id,
            },
        );
    }

    /// `win_*` callbacks: window binding plus the directory-browser flow
    /// (which shares the prefix).
    pub(crate) async fn handle_window_callback(self: &Arc<Self>, cq: &CallbackQuery, data: &str) {
        match data {
            "win_cancel" => {
                let removed = self.browse_states.lock().expect("browse lock").remove(&cq.from.id);
                if let Some(bs) = removed {
                    self.edit_message(bs.chat_id, bs.message_id, "Cancelled.").await;
                }
            }
            "win_new" => {
                // No usable window: switch the same picker message over to
                // the directory browser.
                let pending = self
                    .browse_states
                    .lock()
                    .expect("browse lock")
                    .get(&cq.from.id)
                    .map(|bs| bs.pending_text.clone())
                    .unwrap_or_default();
                if let Some((msg, user)) = synthetic_message(cq) {
                    self.show_directory_browser(msg.chat.id, msg.thread_id(), user.id, &pending)
                        .await;
                }
            }
            _ => {
                if let Some(index) = data.strip_prefix("win_bind:") {
                    self.bind_picked_window(cq, index).await;
                } else {
                    self.handle_directory_callback(cq, data).await;
                }
            }
        }
    }

    async fn bind_picked_window(self: &Arc<Self>, cq: &CallbackQuery, index: &str) {
        let Ok(index) = index.parse::<usize>() else {
            return;
        };
        let Some(bs) = self.browse_states.lock().expect("browse lock").remove(&cq.from.id) else {
            return;
        };
        let Some(window) = bs.windows.get(index).cloned() else {
            self.edit_message(bs.chat_id, bs.message_id, "That window is gone.").await;
            return;
        };

        let user = cq.from.id.to_string();
        let thread = bs.thread_id.to_string();
        {
            let mut state = self.state.lock();
            state.bind_thread(&user, &thread, &window.id);
            state.set_group_chat_id(&user, &thread, bs.chat_id);
            state.set_window_display_name(&window.id, &window.name);

            // Start this observer at the transcript tail, not at history.
            let tail = {
                let ms = self.monitor_state.lock().expect("monitor state lock");
                ms.all_keys()
                    .iter()
                    .filter(|key| {
                        tramuntana_core::session_map::window_id_from_key(key) == window.id
                    })
                    .filter_map(|key| ms.tracked(key).map(|t| t.last_byte_offset))
                    .max()
                    .unwrap_or(0)
            };
            if tail > 0 {
                state.set_user_window_offset(&user, &window.id, tail);
            }
        }
        self.save_state();

        self.edit_message(
            bs.chat_id,
            bs.message_id,
            &format!("Bound to session {} ({}).", window.name, window.id),
        )
        .await;

        // Replay the text that triggered the picker.
        if !bs.pending_text.is_empty() {
            let bot = Arc::clone(self);
            let pending = bs.pending_text.clone();
            let window_id = window.id.clone();
            tokio::spawn(async move {
                if let Err(err) = crate::tmux::send_keys_with_delay(
                    &bot.config.tmux_session_name,
                    &window_id,
                    &pending,
                    crate::bot::handlers::KEY_DELAY_MS,
                )
                .await
                {
                    warn!("error replaying pending text to {}: {}", window_id, err);
                }
            });
        }
    }
}
