//! Slash-command dispatch.

use std::sync::Arc;

use tracing::warn;

use crate::bot::Bot;
use crate::bot::handlers::KEY_DELAY_MS;
use crate::telegram::{Message, User};
use crate::tmux;

impl Bot {
    pub(crate) async fn handle_command(
        self: &Arc<Self>,
        msg: &Message,
        user: &User,
        command: &str,
        args: &str,
    ) {
        // A new command supersedes whatever follow-up was pending.
        self.clear_pending_input(user.id);

        match command {
            "menu" => self.handle_menu(msg).await,
            "esc" | "c_esc" => self.handle_esc(msg, user).await,
            "c_clear" => self.forward_claude_command(msg, user, "clear").await,
            "c_compact" => self.forward_claude_command(msg, user, "compact").await,
            "c_cost" => self.forward_claude_command(msg, user, "cost").await,
            "c_help" => self.forward_claude_command(msg, user, "help").await,
            "c_memory" => self.forward_claude_command(msg, user, "memory").await,
            "c_screenshot" => self.handle_screenshot_command(msg, user).await,
            "c_get" => self.handle_get_command(msg, user).await,
            "p_history" => self.handle_history_command(msg, user).await,
            "p_bind" => self.handle_project_command(msg, user, args).await,
            "p_tasks" => self.handle_tasks_command(msg, user).await,
            "p_add" => self.handle_add_command(msg, user, args).await,
            "p_delete" => self.handle_delete_command(msg, user, args).await,
            "t_pick" => self.handle_pick_command(msg, user, args).await,
            "t_pickw" => self.handle_pickw_command(msg, user, args).await,
            "t_auto" => self.handle_auto_command(msg, user).await,
            "t_batch" => self.handle_batch_command(msg, user, args).await,
            "t_merge" => self.handle_merge_command(msg, user, args).await,
            "t_plan" => self.handle_plan_command(msg, args).await,
            "t_unclaim" => self.handle_unclaim_command(msg, user, args).await,
            other => {
                self.reply(
                    msg.chat.id,
                    msg.thread_id(),
                    &format!("Unknown command: /{other}"),
                )
                .await;
            }
        }
    }

    /// Forward a Claude-side slash command (e.g. `clear`) into the bound
    /// window as typed text.
    pub(crate) async fn forward_claude_command(
        self: &Arc<Self>,
        msg: &Message,
        user: &User,
        claude_command: &str,
    ) {
        let Some(window_id) = self.resolve_window(user.id, msg.thread_id()) else {
            self.reply(
                msg.chat.id,
                msg.thread_id(),
                "Topic not bound to a session. Send a message to bind.",
            )
            .await;
            return;
        };

        let text = format!("/{claude_command}");
        if let Err(err) = tmux::send_keys_with_delay(
            &self.config.tmux_session_name,
            &window_id,
            &text,
            KEY_DELAY_MS,
        )
        .await
        {
            if err.is_window_dead() {
                self.handle_dead_window_interactive(msg, user, &window_id, "").await;
                return;
            }
            warn!("error forwarding {} to {}: {}", text, window_id, err);
            self.reply(msg.chat.id, msg.thread_id(), "Error: failed to send command.")
                .await;
            return;
        }

        // A cleared session writes a fresh transcript; drop the old tracking
        // so the monitor starts over when the new file appears.
        if claude_command == "clear" {
            self.remove_session_tracking(&window_id, false);
        }
    }

    /// Send the Escape key into the bound window.
    pub(crate) async fn handle_esc(self: &Arc<Self>, msg: &Message, user: &User) {
        let Some(window_id) = self.resolve_window(user.id, msg.thread_id()) else {
            self.reply(msg.chat.id, msg.thread_id(), "Topic not bound to a session.")
                .await;
            return;
        };

        if let Err(err) =
            tmux::send_special_key(&self.config.tmux_session_name, &window_id, "Escape")
        {
            if err.is_window_dead() {
                self.handle_dead_window_interactive(msg, user, &window_id, "").await;
                return;
            }
            warn!("error sending Escape to {}: {}", window_id, err);
            self.reply(msg.chat.id, msg.thread_id(), "Error: failed to send Escape.")
                .await;
        }
    }
}
