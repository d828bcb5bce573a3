//! Task selection: partial-id resolution and the tpick inline keyboard.

use std::sync::Arc;

use tracing::warn;

use tramuntana_core::text::truncate;

use crate::bot::{Bot, synthetic_message};
use crate::minuano::Task;
use crate::telegram::{CallbackQuery, InlineKeyboardButton, InlineKeyboardMarkup, Message, User};

/// An open task picker keyboard: the task list it was built from plus the
/// message it owns, so callbacks can edit in place.
#[derive(Debug, Clone)]
pub(crate) struct TaskPickerState {
    pub tasks: Vec<Task>,
    pub mode: String,
    pub chat_id: i64,
    pub thread_id: i64,
    pub message_id: i64,
}

/// Display symbol for a task status.
pub(crate) fn status_symbol(status: &str) -> &'static str {
    match status {
        "pending" => "○",
        "ready" => "◎",
        "claimed" => "●",
        "done" => "✓",
        "failed" => "✗",
        _ => "?",
    }
}

impl Bot {
    /// Resolve a possibly-partial task id against the bound project's tasks.
    /// Exactly one match returns the task; zero or several shows an error or
    /// a picker and returns `None`.
    pub(crate) async fn resolve_task_id(
        self: &Arc<Self>,
        msg: &Message,
        user: &User,
        partial_id: &str,
        mode: &str,
    ) -> Option<Task> {
        let chat_id = msg.chat.id;
        let thread_id = msg.thread_id();

        let Some(project) = self.state.lock().project(&thread_id.to_string()).map(str::to_string)
        else {
            self.reply(chat_id, thread_id, "No project bound. Use /p_bind <name> first.")
                .await;
            return None;
        };

        let Some(bridge) = &self.minuano else {
            self.reply(chat_id, thread_id, "Task tracker is not configured.").await;
            return None;
        };

        let tasks = match bridge.status(&project) {
            Ok(tasks) => tasks,
            Err(err) => {
                warn!("error getting tasks for project {}: {}", project, err);
                self.reply(chat_id, thread_id, "Error: failed to get tasks.").await;
                return None;
            }
        };

        // Only ready/pending tasks make sense to start; partial matching
        // still searches everything so /p_delete can reach claimed tasks.
        let actionable: Vec<Task> = tasks
            .iter()
            .filter(|t| t.status == "ready" || t.status == "pending")
            .cloned()
            .collect();

        if partial_id.is_empty() {
            let pool = if mode == "delete" || mode == "unclaim" {
                tasks
            } else {
                actionable
            };
            self.show_task_picker(msg, user, pool, mode, &project).await;
            return None;
        }

        if let Some(task) = tasks.iter().find(|t| t.id == partial_id) {
            return Some(task.clone());
        }

        let matches: Vec<Task> = tasks
            .iter()
            .filter(|t| t.id.starts_with(partial_id))
            .cloned()
            .collect();
        match matches.len() {
            0 => {
                self.reply(
                    chat_id,
                    thread_id,
                    &format!(
                        "No task matching '{partial_id}'. Use /t_{mode} without arguments to see available tasks."
                    ),
                )
                .await;
                None
            }
            1 => Some(matches.into_iter().next().unwrap()),
            _ => {
                self.show_task_picker(msg, user, matches, mode, &project).await;
                None
            }
        }
    }

    pub(crate) async fn show_task_picker(
        self: &Arc<Self>,
        msg: &Message,
        user: &User,
        tasks: Vec<Task>,
        mode: &str,
        project: &str,
    ) {
        let chat_id = msg.chat.id;
        let thread_id = msg.thread_id();

        if tasks.is_empty() {
            self.reply(chat_id, thread_id, &format!("No ready tasks for project: {project}"))
                .await;
            return;
        }

        let mut rows: Vec<Vec<InlineKeyboardButton>> = tasks
            .iter()
            .map(|t| {
                vec![InlineKeyboardButton::callback(
                    format!("{} {}", status_symbol(&t.status), truncate(&t.title, 40)),
                    format!("tpick_{mode}:{}", t.id),
                )]
            })
            .collect();
        rows.push(vec![InlineKeyboardButton::callback("Cancel", "tpick_cancel")]);

        let keyboard = InlineKeyboardMarkup::new(rows);
        let text = format!("Select a task [{project}]:");

        match self.send_with_keyboard(chat_id, thread_id, &text, &keyboard).await {
            Ok(sent) => {
                self.task_pickers.lock().expect("picker lock").insert(
                    user.id,
                    TaskPickerState {
                        tasks,
                        mode: mode.to_string(),
                        chat_id,
                        thread_id,
                        message_id: sent.message_id,
                    },
                );
            }
            Err(err) => warn!("error sending task picker: {}", err),
        }
    }

    pub(crate) async fn handle_task_picker_callback(self: &Arc<Self>, cq: &CallbackQuery, data: &str) {
        let user_id = cq.from.id;

        if data == "tpick_cancel" {
            let removed = self.task_pickers.lock().expect("picker lock").remove(&user_id);
            if let Some(tps) = removed {
                self.edit_message(tps.chat_id, tps.message_id, "Task selection cancelled.")
                    .await;
            }
            return;
        }

        let Some((verb, task_id)) = data.split_once(':') else {
            return;
        };
        let Some(mode) = verb.strip_prefix("tpick_") else {
            return;
        };

        let picker = self.task_pickers.lock().expect("picker lock").remove(&user_id);
        let title = picker
            .as_ref()
            .and_then(|tps| tps.tasks.iter().find(|t| t.id == task_id))
            .map(|t| t.title.clone())
            .unwrap_or_default();

        if let Some(tps) = &picker {
            self.edit_message(
                tps.chat_id,
                tps.message_id,
                &format!("Selected: {task_id} — {title}"),
            )
            .await;
        }

        let Some((msg, user)) = synthetic_message(cq) else {
            return;
        };
        let chat_id = msg.chat.id;
        let thread_id = msg.thread_id();

        match mode {
            "pick" => self.execute_pick_task(chat_id, thread_id, &user, task_id).await,
            "pickw" => self.execute_pickw_task(chat_id, thread_id, &user, task_id).await,
            "delete" => self.execute_delete_task(chat_id, thread_id, task_id, &title).await,
            "unclaim" => self.execute_unclaim_task(chat_id, thread_id, task_id, &title).await,
            other => warn!("unknown task picker mode: {}", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_symbols() {
        assert_eq!(status_symbol("pending"), "○");
        assert_eq!(status_symbol("ready"), "◎");
        assert_eq!(status_symbol("claimed"), "●");
        assert_eq!(status_symbol("done"), "✓");
        assert_eq!(status_symbol("failed"), "✗");
        assert_eq!(status_symbol("weird"), "?");
    }
}
