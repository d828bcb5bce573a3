//! Output capture for `!` shell commands.
//!
//! Polls the pane for the command's output, sending the first snapshot as a
//! message and editing it in place as the output grows. Each (user, topic)
//! has at most one capture; registration lives in a process-wide map so
//! topic close and new text can cancel it from any task.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use tramuntana_core::terminal;
use tramuntana_core::text;

use crate::bot::Bot;
use crate::tmux;

const MAX_POLLS: u32 = 30;
const POLL_DELAY: Duration = Duration::from_secs(1);
const INIT_DELAY: Duration = Duration::from_secs(2);
const MAX_CHARS: usize = 3800;

static CAPTURES: OnceLock<Mutex<HashMap<(i64, i64), CancellationToken>>> = OnceLock::new();

fn captures() -> &'static Mutex<HashMap<(i64, i64), CancellationToken>> {
    CAPTURES.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Cancel any running capture for the topic.
pub(crate) fn cancel_bash_capture(user_id: i64, thread_id: i64) {
    let token = captures()
        .lock()
        .expect("captures lock")
        .remove(&(user_id, thread_id));
    if let Some(token) = token {
        token.cancel();
    }
}

fn register(user_id: i64, thread_id: i64) -> CancellationToken {
    cancel_bash_capture(user_id, thread_id);
    let token = CancellationToken::new();
    captures()
        .lock()
        .expect("captures lock")
        .insert((user_id, thread_id), token.clone());
    token
}

fn unregister(user_id: i64, thread_id: i64) {
    captures()
        .lock()
        .expect("captures lock")
        .remove(&(user_id, thread_id));
}

impl Bot {
    /// Launch the capture task for a just-sent `!` command.
    pub(crate) fn start_bash_capture(
        self: &Arc<Self>,
        user_id: i64,
        chat_id: i64,
        thread_id: i64,
        window_id: &str,
        command: &str,
    ) {
        let token = register(user_id, thread_id);
        let bot = Arc::clone(self);
        let window_id = window_id.to_string();
        let command = command.to_string();

        tokio::spawn(async move {
            bot.capture_bash_output(token, user_id, chat_id, thread_id, &window_id, &command)
                .await;
            unregister(user_id, thread_id);
        });
    }

    async fn capture_bash_output(
        &self,
        token: CancellationToken,
        user_id: i64,
        chat_id: i64,
        thread_id: i64,
        window_id: &str,
        command: &str,
    ) {
        // Give the command a beat to produce output.
        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(INIT_DELAY) => {}
        }

        let mut message_id: i64 = 0;
        let mut last_output = String::new();

        for _ in 0..MAX_POLLS {
            if token.is_cancelled() {
                return;
            }

            let pane = match tmux::capture_pane(&self.config.tmux_session_name, window_id, false) {
                Ok(pane) => pane,
                Err(err) => {
                    if err.is_window_dead() {
                        debug!("bash capture: window {} is dead, stopping", window_id);
                    } else {
                        warn!("bash capture: capture error: {}", err);
                    }
                    return;
                }
            };

            let output = terminal::extract_bash_output(&pane, command);
            if output.is_empty() || output == last_output {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(POLL_DELAY) => continue,
                }
            }
            last_output = output.clone();

            let display = text::truncate_tail(&output, MAX_CHARS);

            if message_id == 0 {
                match self.send_in_thread(chat_id, thread_id, &display).await {
                    Ok(sent) => message_id = sent.message_id,
                    Err(err) => {
                        warn!("bash capture: send error: {}", err);
                        return;
                    }
                }
            } else {
                self.edit_message(chat_id, message_id, &display).await;
            }

            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(POLL_DELAY) => {}
            }
        }

        debug!("bash capture for {} finished after {} polls", window_id, MAX_POLLS);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_missing_capture_is_noop() {
        cancel_bash_capture(999, 999);
    }

    #[test]
    fn register_cancels_previous() {
        let first = register(1, 2);
        assert!(!first.is_cancelled());

        let second = register(1, 2);
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());

        cancel_bash_capture(1, 2);
        assert!(second.is_cancelled());
        assert!(!captures().lock().unwrap().contains_key(&(1, 2)));
    }
}
