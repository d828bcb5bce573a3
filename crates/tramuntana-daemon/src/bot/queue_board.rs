//! Live pinned status board in the queue topic.
//!
//! Task events arrive in bursts; a 2-second debounce coalesces them before
//! the board is re-derived from tracker state and rewritten in place. The
//! rewrite is idempotent per project, so racing events cannot corrupt it.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::bot::Bot;
use crate::listener::TaskEvent;
use crate::minuano::Task;
use crate::router::QueueBoardHandler;

const DEBOUNCE: Duration = Duration::from_secs(2);

/// Router-facing queue-board handler.
pub struct QueueBoard {
    bot: Arc<Bot>,
    inner: Arc<Mutex<BoardState>>,
}

#[derive(Default)]
struct BoardState {
    pinned_message_id: i64,
    debounce: Option<JoinHandle<()>>,
}

impl QueueBoard {
    pub fn new(bot: Arc<Bot>) -> Self {
        Self {
            bot,
            inner: Arc::new(Mutex::new(BoardState::default())),
        }
    }

    async fn update_board(bot: Arc<Bot>, inner: Arc<Mutex<BoardState>>, project_id: String) {
        let topic_id = bot.config.queue_topic_id;
        let chat_id = bot.find_chat_id_for_topic(topic_id);
        if chat_id == 0 {
            warn!("queue board: no chat ID for queue topic {}", topic_id);
            return;
        }

        let Some(bridge) = &bot.minuano else {
            return;
        };
        let tasks = match bridge.status(&project_id) {
            Ok(tasks) => tasks,
            Err(err) => {
                warn!("queue board: error fetching status for {}: {}", project_id, err);
                return;
            }
        };

        let text = format_status_board(&project_id, &tasks);

        let pinned = inner.lock().expect("board lock").pinned_message_id;
        if pinned != 0 {
            match bot.telegram.edit_message_text(chat_id, pinned, &text).await {
                Ok(()) => return,
                Err(err) => {
                    warn!("queue board: error editing pinned message: {}", err);
                }
            }
        }

        // No board yet (or the old one is gone): send and pin a fresh one.
        match bot.send_in_thread(chat_id, topic_id, &text).await {
            Ok(sent) => {
                inner.lock().expect("board lock").pinned_message_id = sent.message_id;
                if let Err(err) = bot.telegram.pin_message(chat_id, sent.message_id).await {
                    warn!("queue board: error pinning message: {}", err);
                }
            }
            Err(err) => warn!("queue board: error sending status board: {}", err),
        }
    }
}

#[async_trait]
impl QueueBoardHandler for QueueBoard {
    async fn handle_task_update(&self, event: TaskEvent) {
        if self.bot.config.queue_topic_id == 0 || event.project_id.is_empty() {
            return;
        }

        let bot = Arc::clone(&self.bot);
        let inner = Arc::clone(&self.inner);
        let project_id = event.project_id.clone();

        let mut state = self.inner.lock().expect("board lock");
        if let Some(previous) = state.debounce.take() {
            previous.abort();
        }
        state.debounce = Some(tokio::spawn(async move {
            tokio::time::sleep(DEBOUNCE).await;
            Self::update_board(bot, inner, project_id).await;
        }));
    }
}

fn status_emoji(status: &str) -> &'static str {
    match status {
        "draft" => "\u{25cc}",
        "ready" => "\u{2b1c}",
        "claimed" => "\u{1f504}",
        "done" => "\u{2705}",
        "failed" => "\u{274c}",
        "pending_approval" => "\u{1f514}",
        "rejected" => "\u{1f6ab}",
        "pending" => "\u{25cb}",
        _ => "?",
    }
}

/// Counts-by-status summary line followed by one line per task.
fn format_status_board(project_id: &str, tasks: &[Task]) -> String {
    let mut lines = vec![format!("Project: {project_id}"), String::new()];

    let mut counts = std::collections::HashMap::new();
    for task in tasks {
        *counts.entry(task.status.as_str()).or_insert(0usize) += 1;
    }

    let summary: Vec<String> = [
        "done",
        "claimed",
        "ready",
        "pending",
        "draft",
        "pending_approval",
        "rejected",
        "failed",
    ]
    .iter()
    .filter_map(|status| {
        counts
            .get(status)
            .map(|count| format!("{} {}: {}", status_emoji(status), status, count))
    })
    .collect();
    lines.push(summary.join(" | "));
    lines.push(String::new());

    for task in tasks {
        let mut id = task.id.as_str();
        if id.len() > 20 {
            id = &id[..20];
        }
        lines.push(format!("{} {}  {}", status_emoji(&task.status), id, task.title));
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str, title: &str, status: &str) -> Task {
        Task {
            id: id.into(),
            title: title.into(),
            status: status.into(),
            ..Default::default()
        }
    }

    #[test]
    fn board_lists_counts_and_tasks() {
        let tasks = vec![
            task("t-1", "Fix parser", "done"),
            task("t-2", "Ship it", "ready"),
            task("t-3", "Plan more", "ready"),
        ];
        let board = format_status_board("game", &tasks);

        assert!(board.starts_with("Project: game"));
        assert!(board.contains("done: 1"));
        assert!(board.contains("ready: 2"));
        assert!(board.contains("t-1  Fix parser"));
        assert!(board.contains("t-3  Plan more"));
    }

    #[test]
    fn long_task_ids_shortened() {
        let tasks = vec![task(
            "a-very-long-task-identifier-beyond-twenty",
            "X",
            "pending",
        )];
        let board = format_status_board("p", &tasks);
        assert!(board.contains("a-very-long-task-ide"));
        assert!(!board.contains("beyond-twenty"));
    }

    #[test]
    fn emoji_for_every_known_status() {
        for status in [
            "draft",
            "ready",
            "claimed",
            "done",
            "failed",
            "pending_approval",
            "rejected",
            "pending",
        ] {
            assert_ne!(status_emoji(status), "?", "missing emoji for {status}");
        }
        assert_eq!(status_emoji("bogus"), "?");
    }
}
