//! Text-message handling: pending-input routing, forwarding to tmux, the `!`
//! shell-drawer mode and the unbound-topic picker flow.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::bot::Bot;
use crate::telegram::{Message, User};
use crate::tmux;

/// Per-character pacing for forwarded text. Claude's input box drops
/// characters when fed too fast.
pub(crate) const KEY_DELAY_MS: u64 = 15;

/// Pause after opening the shell drawer with `!` before typing the command.
const BANG_DRAWER_DELAY: Duration = Duration::from_secs(1);

impl Bot {
    /// Route a plain text message: record the chat id, try pending input,
    /// then forward to the bound window or enter the unbound flow.
    pub(crate) async fn handle_text_message(self: &Arc<Self>, msg: &Message, user: &User, text: &str) {
        let user_id = user.id.to_string();
        let thread_id = msg.thread_id().to_string();

        // The listener path only knows topic ids; group chat ids are learned
        // lazily from inbound traffic.
        self.state
            .lock()
            .set_group_chat_id(&user_id, &thread_id, msg.chat.id);
        self.save_state();

        // New text in a topic supersedes any running bash capture there.
        super::bash_capture::cancel_bash_capture(user.id, msg.thread_id());

        if self.handle_pending_input(msg, user, text).await {
            return;
        }

        let Some(window_id) = self.resolve_window(user.id, msg.thread_id()) else {
            self.handle_unbound_topic(msg, user, text).await;
            return;
        };

        if let Some(command) = text.strip_prefix('!')
            && !command.is_empty()
        {
            self.handle_bang_command(msg, user, &window_id, command).await;
            return;
        }

        if let Err(err) = tmux::send_keys_with_delay(
            &self.config.tmux_session_name,
            &window_id,
            text,
            KEY_DELAY_MS,
        )
        .await
        {
            if err.is_window_dead() {
                self.handle_dead_window_interactive(msg, user, &window_id, text).await;
                return;
            }
            warn!("error sending keys to {}: {}", window_id, err);
            self.reply(
                msg.chat.id,
                msg.thread_id(),
                "Error: failed to send to Claude session.",
            )
            .await;
        }
    }

    /// `!`-prefixed text opens Claude's shell drawer: send `!`, wait for the
    /// drawer, then type the command. A capture task relays the output back.
    async fn handle_bang_command(
        self: &Arc<Self>,
        msg: &Message,
        user: &User,
        window_id: &str,
        command: &str,
    ) {
        let session = &self.config.tmux_session_name;

        if let Err(err) = tmux::send_keys(session, window_id, "!") {
            if err.is_window_dead() {
                self.handle_dead_window_interactive(msg, user, window_id, "").await;
                return;
            }
            warn!("error opening shell drawer on {}: {}", window_id, err);
            return;
        }

        tokio::time::sleep(BANG_DRAWER_DELAY).await;

        if let Err(err) =
            tmux::send_keys_with_delay(session, window_id, command, KEY_DELAY_MS).await
        {
            warn!("error sending shell command to {}: {}", window_id, err);
            return;
        }

        self.start_bash_capture(
            user.id,
            msg.chat.id,
            msg.thread_id(),
            window_id,
            command,
        );
    }

    /// A dead window discovered while handling user traffic: clean up, tell
    /// the user, and keep their text pending so the next picker replays it.
    pub(crate) async fn handle_dead_window_interactive(
        self: &Arc<Self>,
        msg: &Message,
        user: &User,
        window_id: &str,
        pending_text: &str,
    ) {
        self.cleanup_dead_window(window_id);
        self.reply(
            msg.chat.id,
            msg.thread_id(),
            "Session died. Pick a new session for this topic:",
        )
        .await;
        self.handle_unbound_topic(msg, user, pending_text).await;
    }

    /// Unbound-topic policy: offer unbound windows, falling back to the
    /// directory browser when none exist. The text that triggered this is
    /// retained and replayed after binding.
    pub(crate) async fn handle_unbound_topic(
        self: &Arc<Self>,
        msg: &Message,
        user: &User,
        pending_text: &str,
    ) {
        let windows = match tmux::list_windows(&self.config.tmux_session_name) {
            Ok(windows) => windows,
            Err(err) => {
                warn!("error listing windows: {}", err);
                self.reply(msg.chat.id, msg.thread_id(), "Error listing tmux windows.")
                    .await;
                return;
            }
        };

        let bound = self.state.lock().all_bound_window_ids();
        let unbound: Vec<tmux::Window> = windows
            .into_iter()
            .filter(|w| !bound.contains(&w.id))
            .collect();

        if unbound.is_empty() {
            self.show_directory_browser(msg.chat.id, msg.thread_id(), user.id, pending_text)
                .await;
        } else {
            self.show_window_picker(msg.chat.id, msg.thread_id(), user.id, unbound, pending_text)
                .await;
        }
    }
}
