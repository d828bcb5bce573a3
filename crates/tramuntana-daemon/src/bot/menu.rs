//! `/menu`: one keyboard of every command, grouped by category.

use std::sync::Arc;

use crate::bot::{Bot, synthetic_message};
use crate::telegram::{CallbackQuery, InlineKeyboardButton, InlineKeyboardMarkup, Message};

fn button(text: &str, data: &str) -> InlineKeyboardButton {
    InlineKeyboardButton::callback(text, data)
}

/// The `/menu` keyboard: section header rows are inert `noop` buttons.
pub(crate) fn build_menu_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![
        vec![button("── Terminal ──", "noop")],
        vec![button("Screenshot", "menu_c_screenshot"), button("Esc", "menu_c_esc")],
        vec![
            button("Clear", "menu_c_clear"),
            button("Help", "menu_c_help"),
            button("Get", "menu_c_get"),
        ],
        vec![button("── Project ──", "noop")],
        vec![button("Bind", "menu_p_bind"), button("Tasks", "menu_p_tasks")],
        vec![
            button("Add", "menu_p_add"),
            button("Delete", "menu_p_delete"),
            button("History", "menu_p_history"),
        ],
        vec![button("── Task Execution ──", "noop")],
        vec![button("Pick", "menu_t_pick"), button("Pickw", "menu_t_pickw")],
        vec![button("Auto", "menu_t_auto"), button("Batch", "menu_t_batch")],
        vec![button("Merge", "menu_t_merge"), button("Plan", "menu_t_plan")],
        vec![button("Unclaim", "menu_t_unclaim")],
    ])
}

impl Bot {
    pub(crate) async fn handle_menu(self: &Arc<Self>, msg: &Message) {
        let keyboard = build_menu_keyboard();
        if let Err(err) = self
            .send_with_keyboard(msg.chat.id, msg.thread_id(), "Commands:", &keyboard)
            .await
        {
            tracing::warn!("error sending menu: {}", err);
        }
    }

    /// A menu button press dispatches like the typed command, with the
    /// presser's identity substituted into the original message.
    pub(crate) async fn handle_menu_callback(self: &Arc<Self>, cq: &CallbackQuery, data: &str) {
        let Some(command) = data.strip_prefix("menu_") else {
            return;
        };
        let Some((msg, user)) = synthetic_message(cq) else {
            return;
        };
        self.handle_command(&msg, &user, command, "").await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn menu_covers_all_sections() {
        let kb = build_menu_keyboard();
        let data: Vec<&str> = kb
            .inline_keyboard
            .iter()
            .flatten()
            .map(|b| b.callback_data.as_str())
            .collect();

        for expected in [
            "menu_c_screenshot",
            "menu_c_esc",
            "menu_c_clear",
            "menu_c_help",
            "menu_c_get",
            "menu_p_bind",
            "menu_p_tasks",
            "menu_p_add",
            "menu_p_delete",
            "menu_p_history",
            "menu_t_pick",
            "menu_t_pickw",
            "menu_t_auto",
            "menu_t_batch",
            "menu_t_merge",
            "menu_t_plan",
            "menu_t_unclaim",
        ] {
            assert!(data.contains(&expected), "missing {expected}");
        }

        // Section headers are inert.
        assert_eq!(data.iter().filter(|d| **d == "noop").count(), 3);
    }
}
