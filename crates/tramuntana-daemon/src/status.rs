//! Status poller: surfaces Claude's spinner line as a live status message.
//!
//! Polls every bound window's pane once a second. A new spinner text becomes
//! a `status_update` (edited in place by the queue); the spinner vanishing
//! becomes an optional turn-timing line plus a `status_clear`. Capture
//! hitting a dead window triggers the full dead-window cleanup.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use tramuntana_core::terminal;

use crate::bot::Bot;
use crate::monitor::TurnTimers;
use crate::queue::{ContentType, MessageTask, Queue};
use crate::tmux;

const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Key for per-(user, thread) status dedup.
type StatusKey = (i64, i64);

pub struct StatusPoller {
    bot: Arc<Bot>,
    queue: Queue,
    timers: Arc<TurnTimers>,
    last_status: Mutex<HashMap<StatusKey, String>>,
}

impl StatusPoller {
    pub fn new(bot: Arc<Bot>, queue: Queue, timers: Arc<TurnTimers>) -> Self {
        Self {
            bot,
            queue,
            timers,
            last_status: Mutex::new(HashMap::new()),
        }
    }

    pub async fn run(self, cancel: CancellationToken) {
        info!("status poller started");
        let mut ticker = tokio::time::interval(POLL_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => self.poll().await,
            }
        }
        info!("status poller stopped");
    }

    async fn poll(&self) {
        let bound: Vec<String> = {
            let state = self.bot.state.lock();
            state.all_bound_window_ids().into_iter().collect()
        };

        for window_id in bound {
            let users = self.bot.state.lock().find_users_for_window(&window_id);
            if users.is_empty() {
                continue;
            }

            let pane = match tmux::capture_pane(
                &self.bot.config.tmux_session_name,
                &window_id,
                false,
            ) {
                Ok(pane) => pane,
                Err(err) if err.is_window_dead() => {
                    warn!("status poller: window {} is dead, cleaning up", window_id);
                    self.handle_dead_window(&window_id, &users).await;
                    continue;
                }
                Err(err) => {
                    warn!("status poller: capture failed for {}: {}", window_id, err);
                    continue;
                }
            };

            let status = terminal::extract_status_line(&pane);
            self.fan_out(&window_id, &users, status).await;
        }
    }

    async fn handle_dead_window(
        &self,
        window_id: &str,
        users: &[tramuntana_core::state::UserThread],
    ) {
        // Chat targets must be captured before cleanup removes them.
        let targets: Vec<(i64, i64)> = {
            let state = self.bot.state.lock();
            users
                .iter()
                .filter_map(|ut| {
                    let chat_id = state.group_chat_id(&ut.user_id, &ut.thread_id)?;
                    let thread_id = ut.thread_id.parse().ok()?;
                    Some((chat_id, thread_id))
                })
                .collect()
        };

        for ut in users {
            if let (Ok(user_id), Ok(thread_id)) =
                (ut.user_id.parse::<i64>(), ut.thread_id.parse::<i64>())
            {
                self.bot.clear_user_ui_state(user_id, thread_id);
                self.last_status.lock().expect("status lock").remove(&(user_id, thread_id));
            }
        }
        self.timers.clear(window_id);

        self.bot.cleanup_dead_window(window_id);

        for (chat_id, thread_id) in targets {
            self.bot
                .reply(chat_id, thread_id, "Session died. Send a message to restart.")
                .await;
        }
    }

    async fn fan_out(
        &self,
        window_id: &str,
        users: &[tramuntana_core::state::UserThread],
        status: Option<String>,
    ) {
        for ut in users {
            let Some(chat_id) = self.bot.state.lock().group_chat_id(&ut.user_id, &ut.thread_id)
            else {
                continue;
            };
            let (Ok(user_id), Ok(thread_id)) =
                (ut.user_id.parse::<i64>(), ut.thread_id.parse::<i64>())
            else {
                continue;
            };

            // Content in flight takes priority over status noise.
            if self.queue.queue_len(user_id) > 0 {
                continue;
            }

            let key = (user_id, thread_id);
            let last = self
                .last_status
                .lock()
                .expect("status lock")
                .get(&key)
                .cloned()
                .unwrap_or_default();

            match &status {
                Some(text) => {
                    if *text == last {
                        continue;
                    }
                    self.last_status
                        .lock()
                        .expect("status lock")
                        .insert(key, text.clone());
                    self.timers.note(window_id);
                    self.queue.enqueue(MessageTask {
                        user_id,
                        thread_id,
                        chat_id,
                        content_type: ContentType::StatusUpdate,
                        parts: vec![text.clone()],
                        window_id: window_id.to_string(),
                    });
                }
                None if !last.is_empty() => {
                    self.last_status.lock().expect("status lock").remove(&key);

                    if let Some(start) = self.timers.take(window_id) {
                        self.queue.enqueue(MessageTask {
                            user_id,
                            thread_id,
                            chat_id,
                            content_type: ContentType::Content,
                            parts: vec![format_duration(start.elapsed())],
                            window_id: window_id.to_string(),
                        });
                    }
                    self.queue.enqueue(MessageTask {
                        user_id,
                        thread_id,
                        chat_id,
                        content_type: ContentType::StatusClear,
                        parts: Vec::new(),
                        window_id: window_id.to_string(),
                    });
                }
                None => {}
            }
        }
    }
}

/// `Brewed for 3m 12s` / `Brewed for 45s`.
fn format_duration(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    if secs < 60 {
        format!("Brewed for {secs}s")
    } else {
        format!("Brewed for {}m {}s", secs / 60, secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_formatting() {
        assert_eq!(format_duration(Duration::from_secs(5)), "Brewed for 5s");
        assert_eq!(format_duration(Duration::from_secs(59)), "Brewed for 59s");
        assert_eq!(format_duration(Duration::from_secs(60)), "Brewed for 1m 0s");
        assert_eq!(format_duration(Duration::from_secs(192)), "Brewed for 3m 12s");
    }
}
