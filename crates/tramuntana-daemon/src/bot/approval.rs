//! Approval flow: pending_approval tasks become Approve / Revise / Reject
//! prompts in the approvals topic.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::bot::Bot;
use crate::listener::TaskEvent;
use crate::router::ApprovalHandler;
use crate::telegram::{CallbackQuery, InlineKeyboardButton, InlineKeyboardMarkup};

const BODY_PREVIEW_CHARS: usize = 300;

/// Router-facing approval handler.
pub struct ApprovalNotifier {
    bot: Arc<Bot>,
}

impl ApprovalNotifier {
    pub fn new(bot: Arc<Bot>) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl ApprovalHandler for ApprovalNotifier {
    async fn handle_pending_approval(&self, event: TaskEvent) {
        let topic_id = self.bot.config.approvals_topic_id;
        if topic_id == 0 {
            warn!(
                "approval: TRAMUNTANA_APPROVALS_TOPIC_ID not configured, skipping task {}",
                event.task_id
            );
            return;
        }

        let Some(bridge) = &self.bot.minuano else {
            return;
        };
        let detail = match bridge.show(&event.task_id) {
            Ok(detail) => detail,
            Err(err) => {
                warn!("approval: failed to fetch task {}: {}", event.task_id, err);
                return;
            }
        };

        let project = detail.task.project_id.clone().unwrap_or_default();
        let body = tramuntana_core::text::truncate(&detail.task.body, BODY_PREVIEW_CHARS);
        let text = format!(
            "Approval required\n\n{}\nProject: {}\n\n{}",
            detail.task.title, project, body
        );

        let keyboard = InlineKeyboardMarkup::new(vec![vec![
            InlineKeyboardButton::callback("Approve", format!("approval_approve:{}", event.task_id)),
            InlineKeyboardButton::callback("Revise", format!("approval_revise:{}", event.task_id)),
            InlineKeyboardButton::callback("Reject", format!("approval_reject:{}", event.task_id)),
        ]]);

        let chat_id = self.bot.find_chat_id_for_topic(topic_id);
        if chat_id == 0 {
            warn!("approval: no chat ID found for approvals topic {}", topic_id);
            return;
        }

        if let Err(err) = self
            .bot
            .send_with_keyboard(chat_id, topic_id, &text, &keyboard)
            .await
        {
            warn!("approval: failed to send approval message for {}: {}", event.task_id, err);
        }
    }
}

impl Bot {
    pub(crate) async fn handle_approval_callback(self: &Arc<Self>, cq: &CallbackQuery, data: &str) {
        let Some((action, task_id)) = data.split_once(':') else {
            return;
        };

        match action {
            "approval_approve" => self.approve_task(cq, task_id).await,
            "approval_reject" => self.start_reject_flow(cq, task_id).await,
            "approval_reject_final" => {
                // approval_reject_final:<taskID>:<reason>
                let (task_id, reason) = task_id.split_once(':').unwrap_or((task_id, ""));
                self.execute_approval_reject_final(cq, task_id, reason).await;
            }
            "approval_revise" => {
                self.answer_callback(&cq.id, "Revise: send your feedback in this topic.")
                    .await;
                if let Some(message) = &cq.message {
                    self.set_pending_input(
                        cq.from.id,
                        &format!("approval_revise:{task_id}"),
                        message.chat.id,
                        message.thread_id(),
                    );
                }
            }
            _ => {}
        }
    }

    async fn approve_task(self: &Arc<Self>, cq: &CallbackQuery, task_id: &str) {
        let Some(bridge) = &self.minuano else {
            return;
        };
        let by = cq.from.id.to_string();
        if let Err(err) = bridge.run(&["approve", task_id, "--by", &by]) {
            self.answer_callback(&cq.id, &format!("Error: {err}")).await;
            return;
        }

        if let Some(message) = &cq.message {
            self.edit_message(
                message.chat.id,
                message.message_id,
                &format!(
                    "Approved by {}. Task is now ready.\n\nTask: {task_id}",
                    cq.from.display_name()
                ),
            )
            .await;
        }
        self.answer_callback(&cq.id, "Approved").await;
    }

    /// Rejecting offers an optional reason: the next text in the topic, or
    /// the Skip button for a bare rejection.
    async fn start_reject_flow(self: &Arc<Self>, cq: &CallbackQuery, task_id: &str) {
        if let Some(message) = &cq.message {
            let keyboard = InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::callback(
                "Skip (no reason)",
                format!("approval_reject_final:{task_id}:"),
            )]]);
            self.edit_message_with_keyboard(
                message.chat.id,
                message.message_id,
                &format!("Rejecting task {task_id}.\nReply with a reason, or tap Skip:"),
                &keyboard,
            )
            .await;
            self.set_pending_input(
                cq.from.id,
                &format!("approval_reject_reason:{task_id}"),
                message.chat.id,
                message.thread_id(),
            );
        }
    }

    async fn execute_approval_reject_final(self: &Arc<Self>, cq: &CallbackQuery, task_id: &str, reason: &str) {
        let Some(bridge) = &self.minuano else {
            return;
        };

        let mut args = vec!["reject", task_id];
        if !reason.is_empty() {
            args.push("--reason");
            args.push(reason);
        }
        if let Err(err) = bridge.run(&args) {
            self.answer_callback(&cq.id, &format!("Error: {err}")).await;
            return;
        }

        if let Some(message) = &cq.message {
            let mut text = format!("Rejected. Task: {task_id}");
            if !reason.is_empty() {
                text.push_str(&format!("\nReason: {reason}"));
            }
            self.edit_message(message.chat.id, message.message_id, &text).await;
        }
        self.answer_callback(&cq.id, "Rejected").await;
    }

    /// Pending-input continuation for a typed rejection reason.
    pub(crate) async fn execute_approval_reject(&self, msg: &crate::telegram::Message, task_id: &str, reason: &str) {
        let Some(bridge) = &self.minuano else {
            return;
        };
        let reason = reason.trim();

        let mut args = vec!["reject", task_id];
        if !reason.is_empty() {
            args.push("--reason");
            args.push(reason);
        }
        match bridge.run(&args) {
            Ok(_) => {
                let mut text = format!("Rejected. Task: {task_id}");
                if !reason.is_empty() {
                    text.push_str(&format!("\nReason: {reason}"));
                }
                self.reply(msg.chat.id, msg.thread_id(), &text).await;
            }
            Err(err) => {
                self.reply(msg.chat.id, msg.thread_id(), &format!("Error: {err}")).await;
            }
        }
    }

    /// Pending-input continuation for revise feedback: forwarded to the
    /// planner attached to the task.
    pub(crate) async fn execute_approval_revise(&self, msg: &crate::telegram::Message, task_id: &str, feedback: &str) {
        let Some(bridge) = &self.minuano else {
            return;
        };
        match bridge.run(&["revise", task_id, "--feedback", feedback.trim()]) {
            Ok(_) => {
                self.reply(
                    msg.chat.id,
                    msg.thread_id(),
                    &format!("Revision feedback sent for task {task_id}."),
                )
                .await;
            }
            Err(err) => {
                warn!("revise error for {}: {}", task_id, err);
                self.reply(msg.chat.id, msg.thread_id(), &format!("Error: {err}")).await;
            }
        }
    }
}
