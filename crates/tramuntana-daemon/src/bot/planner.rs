//! `/t_plan`: planner session control through the minuano CLI.

use std::sync::Arc;

use tracing::warn;

use crate::bot::Bot;
use crate::telegram::{CallbackQuery, Message};

impl Bot {
    /// `/t_plan [reopen|release|stop|status|<project>]`. Bare `/t_plan`
    /// starts a planner against the default or bound project.
    pub(crate) async fn handle_plan_command(self: &Arc<Self>, msg: &Message, args: &str) {
        let chat_id = msg.chat.id;
        let thread_id = msg.thread_id();
        let topic = thread_id.to_string();

        let mut parts = args.split_whitespace();
        match parts.next() {
            None => self.planner_start(chat_id, thread_id, &topic, "").await,
            Some("reopen") => self.planner_reopen(chat_id, thread_id, &topic).await,
            Some("release") => self.planner_release(chat_id, thread_id, &topic).await,
            Some("stop") => self.planner_stop(chat_id, thread_id, &topic).await,
            Some("status") => self.planner_status(chat_id, thread_id).await,
            // Anything else is a project name: /t_plan <project>.
            Some(project) => self.planner_start(chat_id, thread_id, &topic, project).await,
        }
    }

    pub(crate) async fn execute_plan_with_project(&self, msg: &Message, text: &str) {
        let thread = msg.thread_id().to_string();
        self.planner_start(msg.chat.id, msg.thread_id(), &thread, text.trim())
            .await;
    }

    async fn planner_start(&self, chat_id: i64, thread_id: i64, topic: &str, project: &str) {
        let mut project = project.to_string();
        if project.is_empty() {
            project = self.config.default_project.clone();
        }
        if project.is_empty()
            && let Some(bound) = self.state.lock().project(topic)
        {
            project = bound.to_string();
        }
        if project.is_empty() {
            self.reply(
                chat_id,
                thread_id,
                "No project specified. Use /t_plan <project> or set TRAMUNTANA_DEFAULT_PROJECT.",
            )
            .await;
            return;
        }

        let Some(bridge) = &self.minuano else {
            self.reply(chat_id, thread_id, "Task tracker is not configured.").await;
            return;
        };

        match bridge.run(&["planner", "start", "--topic", topic, "--project", &project]) {
            Ok(_) => {
                self.reply(
                    chat_id,
                    thread_id,
                    "Planner session started. Send your goals and I will create draft tasks.",
                )
                .await;
            }
            Err(err) if err.to_string().contains("already running") => {
                self.reply(chat_id, thread_id, "Planner already running here. Use /t_plan stop first.")
                    .await;
            }
            Err(err) => {
                warn!("planner start error: {}", err);
                self.reply(chat_id, thread_id, &format!("Error starting planner: {err}")).await;
            }
        }
    }

    async fn planner_reopen(&self, chat_id: i64, thread_id: i64, topic: &str) {
        let Some(bridge) = &self.minuano else {
            self.reply(chat_id, thread_id, "Task tracker is not configured.").await;
            return;
        };
        match bridge.run(&["planner", "reopen", "--topic", topic]) {
            Ok(_) => self.reply(chat_id, thread_id, "Planner session reopened.").await,
            Err(err) => {
                warn!("planner reopen error: {}", err);
                self.reply(chat_id, thread_id, &format!("Error: {err}")).await;
            }
        }
    }

    /// Release all draft tasks of the bound project, confirming with the
    /// project tree.
    async fn planner_release(&self, chat_id: i64, thread_id: i64, topic: &str) {
        let project = self
            .state
            .lock()
            .project(topic)
            .map(str::to_string)
            .unwrap_or_else(|| self.config.default_project.clone());
        if project.is_empty() {
            self.reply(chat_id, thread_id, "No project bound. Use /p_bind first.").await;
            return;
        }

        let Some(bridge) = &self.minuano else {
            self.reply(chat_id, thread_id, "Task tracker is not configured.").await;
            return;
        };

        match bridge.run(&["draft-release", "--all", "--project", &project]) {
            Ok(out) => {
                let mut reply = out.trim().to_string();
                if let Ok(tree) = bridge.run(&["tree", "--project", &project])
                    && !tree.is_empty()
                {
                    reply = format!("{reply}\n\n{}", tree.trim());
                }
                self.reply(chat_id, thread_id, &reply).await;
            }
            Err(err) => {
                warn!("draft-release error: {}", err);
                self.reply(chat_id, thread_id, &format!("Error releasing tasks: {err}")).await;
            }
        }
    }

    async fn planner_stop(&self, chat_id: i64, thread_id: i64, topic: &str) {
        let Some(bridge) = &self.minuano else {
            self.reply(chat_id, thread_id, "Task tracker is not configured.").await;
            return;
        };
        match bridge.run(&["planner", "stop", "--topic", topic]) {
            Ok(_) => {
                self.reply(chat_id, thread_id, "Planner session stopped. Draft tasks preserved.")
                    .await;
            }
            Err(err) => {
                warn!("planner stop error: {}", err);
                self.reply(chat_id, thread_id, &format!("Error: {err}")).await;
            }
        }
    }

    async fn planner_status(&self, chat_id: i64, thread_id: i64) {
        let Some(bridge) = &self.minuano else {
            self.reply(chat_id, thread_id, "Task tracker is not configured.").await;
            return;
        };
        match bridge.run(&["planner", "status"]) {
            Ok(out) => self.reply(chat_id, thread_id, out.trim()).await,
            Err(err) => {
                warn!("planner status error: {}", err);
                self.reply(chat_id, thread_id, &format!("Error: {err}")).await;
            }
        }
    }

    /// `planner_reopen:<topic>` from the crash alert's inline button.
    pub(crate) async fn handle_planner_callback(self: &Arc<Self>, cq: &CallbackQuery, data: &str) {
        let Some((verb, topic)) = data.split_once(':') else {
            return;
        };
        if verb != "planner_reopen" {
            return;
        }
        let Some(bridge) = &self.minuano else {
            self.answer_callback(&cq.id, "Task tracker is not configured.").await;
            return;
        };

        match bridge.run(&["planner", "reopen", "--topic", topic]) {
            Ok(_) => self.answer_callback(&cq.id, "Planner session reopened.").await,
            Err(err) => self.answer_callback(&cq.id, &format!("Error: {err}")).await,
        }
    }
}
