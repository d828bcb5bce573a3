//! Startup reconciliation of persisted bindings against live tmux windows.
//!
//! A bot restart may outlive the windows it was bound to, and a tmux restart
//! renumbers windows entirely. Recovery keeps bindings whose window is live,
//! re-resolves bindings whose display name matches a live window, and drops
//! the rest.

use std::collections::{HashMap, HashSet};

use tracing::{info, warn};

use tramuntana_core::session_map::{self, window_id_from_key};

use crate::bot::Bot;
use crate::tmux;

impl Bot {
    /// Reconcile state against the live multiplexer. Returns the number of
    /// bindings that survived. Called once at startup and after each known
    /// window death.
    pub fn reconcile_state(&self) -> usize {
        let windows = match tmux::list_windows(&self.config.tmux_session_name) {
            Ok(windows) => windows,
            Err(err) => {
                warn!("recovery: cannot list windows: {}", err);
                return 0;
            }
        };

        let live_ids: HashSet<String> = windows.iter().map(|w| w.id.clone()).collect();
        let name_to_id: HashMap<String, String> = windows
            .iter()
            .map(|w| (w.name.clone(), w.id.clone()))
            .collect();

        let mut dropped = 0usize;
        let mut reresolved = 0usize;

        let bound = self.state.lock().all_bound_window_ids();
        for window_id in bound {
            if live_ids.contains(&window_id) {
                continue;
            }

            // A window that died with tmux may live on under a new id with
            // the same display name.
            let display_name = self
                .state
                .lock()
                .window_display_name(&window_id)
                .map(str::to_string);
            if let Some(name) = display_name
                && let Some(new_id) = name_to_id.get(&name)
            {
                self.state.lock().re_resolve_window(&window_id, new_id);
                reresolved += 1;
                continue;
            }

            self.cleanup_dead_window(&window_id);
            dropped += 1;
        }

        self.clean_stale_session_map(&live_ids);

        if dropped > 0 || reresolved > 0 {
            self.save_state();
        }

        let total = self.state.lock().all_bound_window_ids().len();
        info!(
            "recovery: {} live bindings, {} re-resolved, {} dropped",
            total, reresolved, dropped
        );
        total
    }

    /// Remove every trace of a dead window: bindings, group chat ids, window
    /// state, monitor tracking and its session-map entries.
    pub fn cleanup_dead_window(&self, window_id: &str) {
        {
            let mut state = self.state.lock();
            for ut in state.find_users_for_window(window_id) {
                state.unbind_thread(&ut.user_id, &ut.thread_id);
                state.remove_group_chat_id(&ut.user_id, &ut.thread_id);
            }
            state.remove_window_state(window_id);
        }
        self.remove_session_tracking(window_id, true);
        self.save_state();
    }

    /// Session-map entries whose window no longer exists are stale; remove
    /// them so the monitor stops looking.
    fn clean_stale_session_map(&self, live_ids: &HashSet<String>) {
        let path = self.config.session_map_path();
        let Ok(map) = session_map::load(&path) else {
            return;
        };

        for key in map.keys() {
            let window_id = window_id_from_key(key);
            if !live_ids.contains(window_id) {
                if let Err(err) = session_map::remove_entry(&path, key) {
                    warn!("recovery: cannot remove stale session map entry {}: {}", key, err);
                }
                self.monitor_state
                    .lock()
                    .expect("monitor state lock")
                    .remove_session(key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::bot::testutil::test_bot;
    use tramuntana_core::state::WindowState;

    #[tokio::test]
    async fn cleanup_dead_window_removes_all_traces() {
        let dir = tempfile::TempDir::new().unwrap();
        let bot = test_bot(&dir);

        {
            let mut state = bot.state.lock();
            state.bind_thread("100", "42", "@7");
            state.bind_thread("200", "42", "@7");
            state.set_window_state(
                "@7",
                WindowState {
                    session_id: "sess".into(),
                    cwd: "/tmp".into(),
                    window_name: "alpha".into(),
                },
            );
            state.set_window_display_name("@7", "alpha");
            state.set_group_chat_id("100", "42", -100123);
            state.set_group_chat_id("200", "42", -100123);
        }

        bot.cleanup_dead_window("@7");

        let state = bot.state.lock();
        assert!(state.window_for_thread("100", "42").is_none());
        assert!(state.window_for_thread("200", "42").is_none());
        assert!(state.window_state("@7").is_none());
        assert!(state.window_display_name("@7").is_none());
        assert!(state.group_chat_id("100", "42").is_none());
    }
}
