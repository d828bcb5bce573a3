//! Planner crash alerts with an inline reopen button.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::bot::Bot;
use crate::listener::PlannerEvent;
use crate::router::PlannerCrashHandler;
use crate::telegram::{InlineKeyboardButton, InlineKeyboardMarkup};

/// Router-facing crash handler.
pub struct CrashNotifier {
    bot: Arc<Bot>,
}

impl CrashNotifier {
    pub fn new(bot: Arc<Bot>) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl PlannerCrashHandler for CrashNotifier {
    async fn handle_planner_crash(&self, event: PlannerEvent) {
        let topic_id = event.topic_id;
        let chat_id = self.bot.find_chat_id_for_topic(topic_id);
        if chat_id == 0 {
            warn!("crash: no chat ID for topic {}", topic_id);
            return;
        }

        let text = "Planner session crashed. Your draft tasks are preserved.\n\
                    Use /t_plan reopen to restart, or /t_plan status to check.";
        let keyboard = InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::callback(
            "Reopen now",
            format!("planner_reopen:{topic_id}"),
        )]]);

        if let Err(err) = self
            .bot
            .send_with_keyboard(chat_id, topic_id, text, &keyboard)
            .await
        {
            warn!("crash: failed to send crash alert for topic {}: {}", topic_id, err);
        }
    }
}
