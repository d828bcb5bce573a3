//! Ingress dispatcher and command handlers.
//!
//! The `Bot` owns the Telegram long-poll loop and every per-user ephemeral UI
//! state. Handlers live in submodules as `impl Bot` blocks; everything
//! mutating the shared state store locks per operation and persists before
//! yielding.

mod approval;
mod bash_capture;
mod commands;
mod crash;
mod directory_browser;
mod file_browser;
mod handlers;
mod history;
mod interactive;
mod lifecycle;
mod menu;
mod merge;
mod minuano_cmds;
mod pending_input;
mod planner;
mod queue_board;
mod recovery;
mod screenshot;
mod task_picker;
mod window_picker;
mod worktree;

pub use approval::ApprovalNotifier;
pub use crash::CrashNotifier;
pub use queue_board::QueueBoard;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tramuntana_core::callback::{self, CallbackKind};
use tramuntana_core::config::Config;
use tramuntana_core::monitor_state::MonitorState;
use tramuntana_core::state::StateStore;

use crate::minuano::MinuanoBridge;
use crate::queue::Queue;
use crate::telegram::{CallbackQuery, InlineKeyboardMarkup, Message, Telegram, User};

use directory_browser::BrowseState;
use file_browser::FileBrowseState;
use interactive::InteractiveUI;
use pending_input::PendingInput;
use task_picker::TaskPickerState;

/// Pause between getUpdates failures.
const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(5);

pub struct Bot {
    pub config: Arc<Config>,
    pub telegram: Telegram,
    pub state: Arc<StateStore>,
    pub monitor_state: Arc<Mutex<MonitorState>>,
    pub queue: Queue,
    pub minuano: Option<MinuanoBridge>,
    pub cancel: CancellationToken,

    pending_inputs: Mutex<HashMap<i64, PendingInput>>,
    task_pickers: Mutex<HashMap<i64, TaskPickerState>>,
    browse_states: Mutex<HashMap<i64, BrowseState>>,
    file_browsers: Mutex<HashMap<i64, FileBrowseState>>,
    interactive_uis: Mutex<HashMap<(i64, i64), InteractiveUI>>,
    screenshot_messages: Mutex<HashMap<(i64, i64), i64>>,
}

impl Bot {
    pub fn new(
        config: Arc<Config>,
        telegram: Telegram,
        state: Arc<StateStore>,
        monitor_state: Arc<Mutex<MonitorState>>,
        queue: Queue,
        minuano: Option<MinuanoBridge>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            telegram,
            state,
            monitor_state,
            queue,
            minuano,
            cancel,
            pending_inputs: Mutex::new(HashMap::new()),
            task_pickers: Mutex::new(HashMap::new()),
            browse_states: Mutex::new(HashMap::new()),
            file_browsers: Mutex::new(HashMap::new()),
            interactive_uis: Mutex::new(HashMap::new()),
            screenshot_messages: Mutex::new(HashMap::new()),
        }
    }

    /// Long-poll loop. Each update is handled on its own task so a slow
    /// handler (keystroke pacing, warm-up sleeps) never stalls ingress.
    pub async fn run_ingress(self: Arc<Self>, cancel: CancellationToken) {
        info!("telegram ingress started");
        let mut offset: i64 = 0;

        loop {
            let updates = tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.telegram.get_updates(offset) => result,
            };

            let updates = match updates {
                Ok(updates) => updates,
                Err(err) => {
                    warn!("ingress: getUpdates failed: {}", err);
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(POLL_ERROR_BACKOFF) => continue,
                    }
                }
            };

            for update in updates {
                offset = offset.max(update.update_id + 1);
                let bot = Arc::clone(&self);
                tokio::spawn(async move {
                    if let Some(message) = update.message {
                        bot.handle_message(message).await;
                    } else if let Some(cq) = update.callback_query {
                        bot.handle_callback(cq).await;
                    }
                });
            }
        }
        info!("telegram ingress stopped");
    }

    /// The authorization gate: sender must be allow-listed, and the chat must
    /// be the sender's private chat or an allow-listed group.
    pub fn is_authorized(&self, user_id: i64, chat_id: i64) -> bool {
        if !self.config.is_allowed_user(user_id) {
            return false;
        }
        chat_id == user_id || self.config.is_allowed_group(chat_id)
    }

    async fn handle_message(self: &Arc<Self>, msg: Message) {
        let Some(user) = msg.from.clone() else {
            return;
        };
        if !self.is_authorized(user.id, msg.chat.id) {
            debug!("dropping message from unauthorized user {} in chat {}", user.id, msg.chat.id);
            return;
        }

        if msg.is_topic_closed() {
            self.handle_topic_close(&msg).await;
            return;
        }

        let Some(text) = msg.text.clone() else {
            return;
        };

        if let Some((command, args)) = parse_command(&text) {
            self.handle_command(&msg, &user, &command, &args).await;
            return;
        }

        self.handle_text_message(&msg, &user, &text).await;
    }

    async fn handle_callback(self: &Arc<Self>, cq: CallbackQuery) {
        let Some(data) = cq.data.clone() else {
            return;
        };
        if let Some(message) = &cq.message
            && !self.is_authorized(cq.from.id, message.chat.id)
        {
            debug!("dropping callback from unauthorized user {}", cq.from.id);
            return;
        }

        // Answer first: the client spinner must be dismissed even when the
        // handler fails.
        self.answer_callback(&cq.id, "").await;

        match callback::classify(&data) {
            CallbackKind::Approval => self.handle_approval_callback(&cq, &data).await,
            CallbackKind::TaskPick => self.handle_task_picker_callback(&cq, &data).await,
            CallbackKind::Merge => self.handle_merge_callback(&cq, &data).await,
            CallbackKind::Window => self.handle_window_callback(&cq, &data).await,
            CallbackKind::Get => self.handle_file_browser_callback(&cq, &data).await,
            CallbackKind::History => self.handle_history_callback(&cq, &data).await,
            CallbackKind::Screenshot => self.handle_screenshot_callback(&cq, &data).await,
            CallbackKind::Nav => self.handle_interactive_callback(&cq, &data).await,
            CallbackKind::Menu => self.handle_menu_callback(&cq, &data).await,
            CallbackKind::Planner => self.handle_planner_callback(&cq, &data).await,
            CallbackKind::Noop => {}
            CallbackKind::Unknown => warn!("unknown callback data: {}", data),
        }
    }

    // --- chat helpers -----------------------------------------------------

    /// Fire-and-forget reply into a topic; failures are logged.
    pub async fn reply(&self, chat_id: i64, thread_id: i64, text: &str) {
        if let Err(err) = self.telegram.send_message(chat_id, thread_id, text).await {
            warn!("reply failed in chat {} thread {}: {}", chat_id, thread_id, err);
        }
    }

    pub async fn send_in_thread(
        &self,
        chat_id: i64,
        thread_id: i64,
        text: &str,
    ) -> Result<Message, crate::telegram::TelegramError> {
        self.telegram.send_message(chat_id, thread_id, text).await
    }

    pub async fn send_with_keyboard(
        &self,
        chat_id: i64,
        thread_id: i64,
        text: &str,
        keyboard: &InlineKeyboardMarkup,
    ) -> Result<Message, crate::telegram::TelegramError> {
        self.telegram
            .send_message_with_keyboard(chat_id, thread_id, text, keyboard)
            .await
    }

    pub async fn edit_message(&self, chat_id: i64, message_id: i64, text: &str) {
        if let Err(err) = self.telegram.edit_message_text(chat_id, message_id, text).await {
            debug!("edit failed for message {}: {}", message_id, err);
        }
    }

    pub async fn edit_message_with_keyboard(
        &self,
        chat_id: i64,
        message_id: i64,
        text: &str,
        keyboard: &InlineKeyboardMarkup,
    ) {
        if let Err(err) = self
            .telegram
            .edit_message_with_keyboard(chat_id, message_id, text, keyboard)
            .await
        {
            debug!("keyboard edit failed for message {}: {}", message_id, err);
        }
    }

    pub async fn answer_callback(&self, callback_id: &str, text: &str) {
        if let Err(err) = self.telegram.answer_callback(callback_id, text).await {
            debug!("answerCallbackQuery failed: {}", err);
        }
    }

    /// Window id bound to the sender's topic, if any.
    pub fn resolve_window(&self, user_id: i64, thread_id: i64) -> Option<String> {
        self.state
            .lock()
            .window_for_thread(&user_id.to_string(), &thread_id.to_string())
            .map(str::to_string)
    }

    /// The chat id that reaches a given topic: any stored group-chat id for
    /// it, with the first allowed group as fallback.
    pub fn find_chat_id_for_topic(&self, thread_id: i64) -> i64 {
        let thread = thread_id.to_string();
        let state = self.state.lock();
        for user_id in state.all_user_ids() {
            if let Some(chat_id) = state.group_chat_id(&user_id, &thread) {
                return chat_id;
            }
        }
        drop(state);
        self.config.allowed_groups.first().copied().unwrap_or(0)
    }

    /// Drop every piece of ephemeral UI state for a (user, topic): running
    /// bash captures, interactive relays and screenshot keyboards.
    pub fn clear_user_ui_state(&self, user_id: i64, thread_id: i64) {
        bash_capture::cancel_bash_capture(user_id, thread_id);
        self.interactive_uis
            .lock()
            .expect("interactive lock")
            .remove(&(user_id, thread_id));
        self.screenshot_messages
            .lock()
            .expect("screenshot lock")
            .remove(&(user_id, thread_id));
    }

    pub fn save_state(&self) {
        if let Err(err) = self.state.save() {
            warn!("cannot persist state: {}", err);
        }
    }
}

/// A message-like view synthesized from a callback query, preserving the
/// presser's identity with the original message's chat context.
pub(crate) fn synthetic_message(cq: &CallbackQuery) -> Option<(Message, User)> {
    let message = cq.message.clone()?;
    Some((message, cq.from.clone()))
}

/// Split `/verb arg...` into the command verb and its argument string.
/// Handles the `/verb@botname` form. Returns `None` for non-commands.
pub(crate) fn parse_command(text: &str) -> Option<(String, String)> {
    let rest = text.strip_prefix('/')?;
    if rest.is_empty() {
        return None;
    }
    let (verb, args) = match rest.split_once(char::is_whitespace) {
        Some((verb, args)) => (verb, args.trim()),
        None => (rest, ""),
    };
    let verb = verb.split('@').next().unwrap_or(verb);
    if verb.is_empty() {
        return None;
    }
    Some((verb.to_string(), args.to_string()))
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use tramuntana_core::flood::FloodControl;

    /// A fully wired Bot over a temp state directory. The Telegram client
    /// points at an unused token; tests exercising network paths don't use
    /// this helper.
    pub(crate) fn test_bot(dir: &tempfile::TempDir) -> Arc<Bot> {
        test_bot_with_groups(dir, vec![-100123])
    }

    pub(crate) fn test_bot_with_groups(
        dir: &tempfile::TempDir,
        allowed_groups: Vec<i64>,
    ) -> Arc<Bot> {
        let config = Arc::new(Config {
            telegram_bot_token: "test-token".into(),
            allowed_users: vec![100, 200],
            allowed_groups,
            tramuntana_dir: dir.path().to_path_buf(),
            tmux_session_name: "tramuntana_test".into(),
            claude_command: "claude".into(),
            monitor_poll_interval: 2.0,
            minuano_bin: "minuano".into(),
            minuano_db: String::new(),
            minuano_scripts_dir: String::new(),
            approvals_topic_id: 0,
            queue_topic_id: 0,
            default_project: String::new(),
        });
        let telegram = Telegram::new(&config.telegram_bot_token);
        let state = Arc::new(StateStore::load(&dir.path().join("state.json")).unwrap());
        let cancel = CancellationToken::new();
        let queue = Queue::new(
            Arc::new(telegram.clone()),
            Arc::new(FloodControl::new()),
            cancel.clone(),
        );
        Arc::new(Bot::new(
            config,
            telegram,
            state,
            Arc::new(Mutex::new(MonitorState::new())),
            queue,
            None,
            cancel,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_parsing() {
        assert_eq!(
            parse_command("/t_pick abc"),
            Some(("t_pick".into(), "abc".into()))
        );
        assert_eq!(parse_command("/menu"), Some(("menu".into(), String::new())));
        assert_eq!(
            parse_command("/t_merge@tramuntana_bot feature-x"),
            Some(("t_merge".into(), "feature-x".into()))
        );
        assert_eq!(parse_command("hello"), None);
        assert_eq!(parse_command("/"), None);
    }

    #[test]
    fn authorization_matrix() {
        let dir = tempfile::TempDir::new().unwrap();
        let bot = testutil::test_bot(&dir);

        assert!(bot.is_authorized(100, 100)); // private chat
        assert!(bot.is_authorized(100, -100123)); // allowed group
        assert!(!bot.is_authorized(100, -100999)); // disallowed group
        assert!(!bot.is_authorized(999, 999)); // unknown user
        assert!(bot.is_authorized(200, 200));

        let open = testutil::test_bot_with_groups(&dir, Vec::new());
        assert!(open.is_authorized(100, -100999)); // empty list allows all
    }
}
