//! Task-tracker commands: project binding, task listing, pick/auto/batch
//! prompt delivery, add/delete/unclaim.

use std::io::Write;
use std::sync::Arc;

use tracing::warn;

use tramuntana_core::text::truncate;

use crate::bot::handlers::KEY_DELAY_MS;
use crate::bot::task_picker::status_symbol;
use crate::bot::Bot;
use crate::telegram::{InlineKeyboardButton, InlineKeyboardMarkup, Message, User};
use crate::tmux;

impl Bot {
    /// `/p_bind [name]` — bind the topic to a tracker project.
    pub(crate) async fn handle_project_command(self: &Arc<Self>, msg: &Message, user: &User, args: &str) {
        let chat_id = msg.chat.id;
        let thread_id = msg.thread_id();

        let name = args.trim();
        if name.is_empty() {
            let current = self.state.lock().project(&thread_id.to_string()).map(str::to_string);
            let prompt = match current {
                Some(project) => format!("Current project: {project}\n\nSend a name to bind:"),
                None => "No project bound. Send a name to bind:".to_string(),
            };
            self.reply(chat_id, thread_id, &prompt).await;
            self.set_pending_input(user.id, "p_bind", chat_id, thread_id);
            return;
        }

        self.execute_project_bind(msg, name).await;
    }

    pub(crate) async fn execute_project_bind(&self, msg: &Message, project: &str) {
        let thread_id = msg.thread_id();
        self.state
            .lock()
            .bind_project(&thread_id.to_string(), project.trim());
        self.save_state();
        self.reply(msg.chat.id, thread_id, &format!("Bound to project: {}", project.trim()))
            .await;
    }

    /// `/p_tasks` — list the project's tasks with pick buttons for the
    /// actionable ones.
    pub(crate) async fn handle_tasks_command(self: &Arc<Self>, msg: &Message, user: &User) {
        let chat_id = msg.chat.id;
        let thread_id = msg.thread_id();

        let Some(project) = self.state.lock().project(&thread_id.to_string()).map(str::to_string)
        else {
            self.reply(chat_id, thread_id, "No project bound. Use /p_bind <name> first.")
                .await;
            return;
        };
        let Some(bridge) = &self.minuano else {
            self.reply(chat_id, thread_id, "Task tracker is not configured.").await;
            return;
        };

        let tasks = match bridge.status(&project) {
            Ok(tasks) => tasks,
            Err(err) => {
                warn!("error getting tasks for project {}: {}", project, err);
                self.reply(chat_id, thread_id, "Error: failed to get tasks.").await;
                return;
            }
        };
        if tasks.is_empty() {
            self.reply(chat_id, thread_id, &format!("No tasks for project: {project}"))
                .await;
            return;
        }

        let mut lines = vec![format!("Tasks [{project}]:")];
        for t in &tasks {
            let claimed = t
                .claimed_by
                .as_deref()
                .map(|by| format!(" ({by})"))
                .unwrap_or_default();
            lines.push(format!(
                "  {} {} — {} [{}]{}",
                status_symbol(&t.status),
                t.id,
                t.title,
                t.status,
                claimed
            ));
        }

        let rows: Vec<Vec<InlineKeyboardButton>> = tasks
            .iter()
            .filter(|t| t.status == "ready" || t.status == "pending")
            .map(|t| {
                vec![InlineKeyboardButton::callback(
                    format!("{} {}", status_symbol(&t.status), truncate(&t.title, 35)),
                    format!("tpick_pick:{}", t.id),
                )]
            })
            .collect();

        let text = lines.join("\n");
        if rows.is_empty() {
            self.reply(chat_id, thread_id, &text).await;
            return;
        }

        let keyboard = InlineKeyboardMarkup::new(rows);
        match self.send_with_keyboard(chat_id, thread_id, &text, &keyboard).await {
            Ok(sent) => {
                self.task_pickers.lock().expect("picker lock").insert(
                    user.id,
                    super::task_picker::TaskPickerState {
                        tasks,
                        mode: "pick".into(),
                        chat_id,
                        thread_id,
                        message_id: sent.message_id,
                    },
                );
            }
            Err(err) => warn!("error sending task list: {}", err),
        }
    }

    /// `/t_pick [id]` — send a single-task prompt into the bound window.
    pub(crate) async fn handle_pick_command(self: &Arc<Self>, msg: &Message, user: &User, args: &str) {
        let Some(task) = self.resolve_task_id(msg, user, args.trim(), "pick").await else {
            return;
        };
        self.execute_pick_task(msg.chat.id, msg.thread_id(), user, &task.id).await;
    }

    pub(crate) async fn execute_pick_task(
        self: &Arc<Self>,
        chat_id: i64,
        thread_id: i64,
        user: &User,
        task_id: &str,
    ) {
        let Some(window_id) = self.resolve_window(user.id, thread_id) else {
            self.reply(chat_id, thread_id, "Topic not bound to a session.").await;
            return;
        };
        let Some(bridge) = &self.minuano else {
            self.reply(chat_id, thread_id, "Task tracker is not configured.").await;
            return;
        };

        let prompt = match bridge.prompt_single(task_id) {
            Ok(prompt) => prompt,
            Err(err) => {
                warn!("error generating prompt for {}: {}", task_id, err);
                self.reply(chat_id, thread_id, &format!("Error: {err}")).await;
                return;
            }
        };

        if let Err(err) = self.send_prompt_to_window(&window_id, &prompt).await {
            warn!("error sending prompt to tmux: {}", err);
            self.reply(chat_id, thread_id, "Error: failed to send prompt.").await;
            return;
        }

        self.reply(chat_id, thread_id, &format!("Working on task {task_id}...")).await;
    }

    /// `/t_auto` — start the autonomous claim-work-repeat loop.
    pub(crate) async fn handle_auto_command(self: &Arc<Self>, msg: &Message, user: &User) {
        let chat_id = msg.chat.id;
        let thread_id = msg.thread_id();

        let Some(project) = self.state.lock().project(&thread_id.to_string()).map(str::to_string)
        else {
            self.reply(chat_id, thread_id, "No project bound. Use /p_bind <name> first.")
                .await;
            return;
        };
        let Some(window_id) = self.resolve_window(user.id, thread_id) else {
            self.reply(chat_id, thread_id, "Topic not bound to a session.").await;
            return;
        };
        let Some(bridge) = &self.minuano else {
            self.reply(chat_id, thread_id, "Task tracker is not configured.").await;
            return;
        };

        let prompt = match bridge.prompt_auto(&project) {
            Ok(prompt) => prompt,
            Err(err) => {
                warn!("error generating auto prompt for {}: {}", project, err);
                self.reply(chat_id, thread_id, &format!("Error: {err}")).await;
                return;
            }
        };

        if let Err(err) = self.send_prompt_to_window(&window_id, &prompt).await {
            warn!("error sending prompt to tmux: {}", err);
            self.reply(chat_id, thread_id, "Error: failed to send prompt.").await;
            return;
        }

        self.reply(
            chat_id,
            thread_id,
            &format!("Starting autonomous mode for project {project}..."),
        )
        .await;
    }

    /// `/t_batch [ids...]` — multi-task prompt; asks for ids when missing.
    pub(crate) async fn handle_batch_command(self: &Arc<Self>, msg: &Message, user: &User, args: &str) {
        if args.trim().is_empty() {
            self.reply(msg.chat.id, msg.thread_id(), "Send the task IDs (space-separated):")
                .await;
            self.set_pending_input(user.id, "t_batch", msg.chat.id, msg.thread_id());
            return;
        }
        self.execute_batch_with_args(msg, user, args).await;
    }

    pub(crate) async fn execute_batch_with_args(self: &Arc<Self>, msg: &Message, user: &User, text: &str) {
        let ids: Vec<&str> = text.split_whitespace().collect();
        if ids.is_empty() {
            self.reply(msg.chat.id, msg.thread_id(), "No task IDs provided.").await;
            return;
        }

        let chat_id = msg.chat.id;
        let thread_id = msg.thread_id();

        let Some(window_id) = self.resolve_window(user.id, thread_id) else {
            self.reply(chat_id, thread_id, "Topic not bound to a session.").await;
            return;
        };
        let Some(bridge) = &self.minuano else {
            self.reply(chat_id, thread_id, "Task tracker is not configured.").await;
            return;
        };

        let prompt = match bridge.prompt_batch(&ids) {
            Ok(prompt) => prompt,
            Err(err) => {
                warn!("error generating batch prompt: {}", err);
                self.reply(chat_id, thread_id, &format!("Error: {err}")).await;
                return;
            }
        };

        if let Err(err) = self.send_prompt_to_window(&window_id, &prompt).await {
            warn!("error sending prompt to tmux: {}", err);
            self.reply(chat_id, thread_id, "Error: failed to send prompt.").await;
            return;
        }

        self.reply(chat_id, thread_id, &format!("Working on batch: {}...", ids.join(", ")))
            .await;
    }

    /// `/p_add [title]` — create a draft task.
    pub(crate) async fn handle_add_command(self: &Arc<Self>, msg: &Message, user: &User, args: &str) {
        if args.trim().is_empty() {
            self.reply(msg.chat.id, msg.thread_id(), "Send the task title:").await;
            self.set_pending_input(user.id, "p_add", msg.chat.id, msg.thread_id());
            return;
        }
        self.execute_add_with_title(msg, args).await;
    }

    pub(crate) async fn execute_add_with_title(&self, msg: &Message, title: &str) {
        let chat_id = msg.chat.id;
        let thread_id = msg.thread_id();

        let Some(project) = self.state.lock().project(&thread_id.to_string()).map(str::to_string)
        else {
            self.reply(chat_id, thread_id, "No project bound. Use /p_bind <name> first.")
                .await;
            return;
        };
        let Some(bridge) = &self.minuano else {
            self.reply(chat_id, thread_id, "Task tracker is not configured.").await;
            return;
        };

        match bridge.add_task(&project, title.trim()) {
            Ok(out) => {
                let confirmation = if out.is_empty() {
                    format!("Added task: {}", title.trim())
                } else {
                    out
                };
                self.reply(chat_id, thread_id, &confirmation).await;
            }
            Err(err) => {
                warn!("error adding task: {}", err);
                self.reply(chat_id, thread_id, &format!("Error: {err}")).await;
            }
        }
    }

    /// `/p_delete [id]` — delete a task, via picker when ambiguous.
    pub(crate) async fn handle_delete_command(self: &Arc<Self>, msg: &Message, user: &User, args: &str) {
        let Some(task) = self.resolve_task_id(msg, user, args.trim(), "delete").await else {
            return;
        };
        self.execute_delete_task(msg.chat.id, msg.thread_id(), &task.id, &task.title)
            .await;
    }

    pub(crate) async fn execute_delete_task(
        &self,
        chat_id: i64,
        thread_id: i64,
        task_id: &str,
        title: &str,
    ) {
        let Some(bridge) = &self.minuano else {
            self.reply(chat_id, thread_id, "Task tracker is not configured.").await;
            return;
        };
        match bridge.delete(task_id) {
            Ok(()) => {
                self.reply(chat_id, thread_id, &format!("Deleted task: {task_id} — {title}"))
                    .await;
            }
            Err(err) => {
                warn!("error deleting task {}: {}", task_id, err);
                self.reply(chat_id, thread_id, &format!("Error: {err}")).await;
            }
        }
    }

    /// `/t_unclaim [id]` — release a claimed task back to ready.
    pub(crate) async fn handle_unclaim_command(self: &Arc<Self>, msg: &Message, user: &User, args: &str) {
        let Some(task) = self.resolve_task_id(msg, user, args.trim(), "unclaim").await else {
            return;
        };
        self.execute_unclaim_task(msg.chat.id, msg.thread_id(), &task.id, &task.title)
            .await;
    }

    pub(crate) async fn execute_unclaim_task(
        &self,
        chat_id: i64,
        thread_id: i64,
        task_id: &str,
        title: &str,
    ) {
        let Some(bridge) = &self.minuano else {
            self.reply(chat_id, thread_id, "Task tracker is not configured.").await;
            return;
        };
        match bridge.unclaim(task_id) {
            Ok(()) => {
                self.reply(chat_id, thread_id, &format!("Unclaimed task: {task_id} — {title}"))
                    .await;
            }
            Err(err) => {
                warn!("error unclaiming task {}: {}", task_id, err);
                self.reply(chat_id, thread_id, &format!("Error: {err}")).await;
            }
        }
    }

    /// Deliver a long prompt through a temp file: tmux send-keys has length
    /// limits, so the window gets a one-line pointer instead.
    pub(crate) async fn send_prompt_to_window(
        &self,
        window_id: &str,
        prompt: &str,
    ) -> Result<(), String> {
        let mut file = tempfile::Builder::new()
            .prefix("tramuntana-task-")
            .suffix(".md")
            .tempfile()
            .map_err(|e| e.to_string())?;
        file.write_all(prompt.as_bytes()).map_err(|e| e.to_string())?;
        // The window reads the file after we return; persist it.
        let (_, path) = file.keep().map_err(|e| e.to_string())?;

        let reference = format!(
            "Please read and follow the instructions in {}",
            path.display()
        );
        tmux::send_keys_with_delay(
            &self.config.tmux_session_name,
            window_id,
            &reference,
            KEY_DELAY_MS,
        )
        .await
        .map_err(|e| e.to_string())
    }
}
