//! One-shot pending input: the next text a user sends in a specific topic is
//! consumed by a command continuation instead of being forwarded to tmux.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::bot::Bot;
use crate::telegram::{Message, User};

/// A command waiting for textual follow-up.
#[derive(Debug, Clone)]
pub struct PendingInput {
    /// Command tag, e.g. `p_bind`, `t_merge`, `approval_reject_reason:<id>`.
    pub command: String,
    pub chat_id: i64,
    pub thread_id: i64,
}

impl Bot {
    /// Register a pending input for a user; a newer one replaces any prior.
    pub fn set_pending_input(&self, user_id: i64, command: &str, chat_id: i64, thread_id: i64) {
        self.pending_inputs.lock().expect("pending lock").insert(
            user_id,
            PendingInput {
                command: command.to_string(),
                chat_id,
                thread_id,
            },
        );
    }

    pub fn clear_pending_input(&self, user_id: i64) {
        self.pending_inputs.lock().expect("pending lock").remove(&user_id);
    }

    /// Take the pending input if one exists for this user *and* topic.
    fn consume_pending_input(&self, user_id: i64, thread_id: i64) -> Option<PendingInput> {
        let mut pending = self.pending_inputs.lock().expect("pending lock");
        let entry = pending.get(&user_id)?;
        if entry.thread_id != thread_id {
            return None;
        }
        pending.remove(&user_id)
    }

    /// Try to route a text message into a pending command continuation.
    /// Returns true when the message was consumed.
    pub(crate) async fn handle_pending_input(
        self: &Arc<Self>,
        msg: &Message,
        user: &User,
        text: &str,
    ) -> bool {
        let Some(pending) = self.consume_pending_input(user.id, msg.thread_id()) else {
            return false;
        };

        debug!(
            "pending input consumed: command={} text={:?}",
            pending.command, text
        );

        match pending.command.as_str() {
            "p_bind" => self.execute_project_bind(msg, text).await,
            "p_add" => self.execute_add_with_title(msg, text).await,
            "t_batch" => self.execute_batch_with_args(msg, user, text).await,
            "t_merge" => self.execute_merge_with_branch(msg, user, text).await,
            "t_plan" => self.execute_plan_with_project(msg, text).await,
            tagged => {
                if let Some(task_id) = tagged.strip_prefix("approval_reject_reason:") {
                    self.execute_approval_reject(msg, task_id, text).await;
                } else if let Some(task_id) = tagged.strip_prefix("approval_revise:") {
                    self.execute_approval_revise(msg, task_id, text).await;
                } else {
                    warn!("unknown pending input command: {}", tagged);
                    return false;
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use crate::bot::testutil::test_bot;

    #[tokio::test]
    async fn pending_input_matches_user_and_topic() {
        let dir = tempfile::TempDir::new().unwrap();
        let bot = test_bot(&dir);

        bot.set_pending_input(100, "p_bind", -100123, 42);

        // Wrong topic: not consumed.
        assert!(bot.consume_pending_input(100, 43).is_none());
        // Wrong user: not consumed.
        assert!(bot.consume_pending_input(200, 42).is_none());
        // Match: consumed exactly once.
        let taken = bot.consume_pending_input(100, 42).unwrap();
        assert_eq!(taken.command, "p_bind");
        assert!(bot.consume_pending_input(100, 42).is_none());
    }

    #[tokio::test]
    async fn newer_pending_input_overwrites() {
        let dir = tempfile::TempDir::new().unwrap();
        let bot = test_bot(&dir);

        bot.set_pending_input(100, "p_bind", -100123, 42);
        bot.set_pending_input(100, "t_merge", -100123, 42);

        let taken = bot.consume_pending_input(100, 42).unwrap();
        assert_eq!(taken.command, "t_merge");
    }

    #[tokio::test]
    async fn clear_removes_pending() {
        let dir = tempfile::TempDir::new().unwrap();
        let bot = test_bot(&dir);

        bot.set_pending_input(100, "p_add", -100123, 42);
        bot.clear_pending_input(100);
        assert!(bot.consume_pending_input(100, 42).is_none());
    }
}
