//! Binding lifecycle: window creation for a directory, topic close and the
//! session-map wait that links a fresh window to its transcript.

use std::collections::HashMap;
use std::time::Duration;

use tracing::{info, warn};

use tramuntana_core::session_map::{self, window_id_from_key};
use tramuntana_core::state::WindowState;

use crate::bot::Bot;
use crate::git;
use crate::telegram::Message;
use crate::tmux;

const SESSION_MAP_POLLS: u32 = 10;
const SESSION_MAP_POLL_DELAY: Duration = Duration::from_millis(500);

/// Result of creating a window for a picked directory.
pub(crate) struct CreatedWindow {
    pub window_id: String,
}

impl Bot {
    /// Create a Claude window in `dir`, bind it to the topic, and wait for
    /// the session map to learn its transcript.
    pub(crate) async fn create_window_for_dir(
        &self,
        dir: &str,
        user_id: i64,
        chat_id: i64,
        thread_id: i64,
    ) -> Result<CreatedWindow, String> {
        let name = window_name_for_dir(dir);
        let env = self.minuano_window_env(&name);

        let window_id = tmux::new_window(
            &self.config.tmux_session_name,
            &name,
            dir,
            &self.config.claude_command,
            &env,
        )
        .map_err(|e| e.to_string())?;

        self.wait_for_session_map(&window_id).await;

        let user = user_id.to_string();
        let thread = thread_id.to_string();
        {
            let mut state = self.state.lock();
            state.bind_thread(&user, &thread, &window_id);
            state.set_group_chat_id(&user, &thread, chat_id);
        }
        self.save_state();

        info!("created window {} in {} for topic {}", window_id, dir, thread_id);
        Ok(CreatedWindow { window_id })
    }

    /// Poll the session map for an entry matching the new window and copy it
    /// into the window state. Gives up silently after ten polls; the monitor
    /// will pick the session up when the hook eventually writes it.
    pub(crate) async fn wait_for_session_map(&self, window_id: &str) {
        let path = self.config.session_map_path();
        for _ in 0..SESSION_MAP_POLLS {
            tokio::time::sleep(SESSION_MAP_POLL_DELAY).await;
            let Ok(map) = session_map::load(&path) else {
                continue;
            };
            for (key, entry) in map {
                if key.ends_with(&format!(":{window_id}")) {
                    let mut state = self.state.lock();
                    state.set_window_state(
                        window_id,
                        WindowState {
                            session_id: entry.session_id,
                            cwd: entry.cwd,
                            window_name: entry.window_name.clone(),
                        },
                    );
                    state.set_window_display_name(window_id, &entry.window_name);
                    drop(state);
                    self.save_state();
                    return;
                }
            }
        }
        warn!("no session map entry appeared for window {}", window_id);
    }

    /// Forum topic closed: kill every bound window, clean all related state
    /// and remove the worktree unless this was a merge topic.
    pub(crate) async fn handle_topic_close(&self, msg: &Message) {
        let thread_id = msg.thread_id();
        let thread = thread_id.to_string();
        let mut cleaned = false;

        let user_ids = self.state.lock().all_user_ids();
        for user_id in user_ids {
            let Some(window_id) = self
                .state
                .lock()
                .window_for_thread(&user_id, &thread)
                .map(str::to_string)
            else {
                continue;
            };
            cleaned = true;

            if let (Ok(uid), Ok(tid)) = (user_id.parse::<i64>(), thread.parse::<i64>()) {
                self.clear_user_ui_state(uid, tid);
            }

            // The window may already be dead; killing is best-effort.
            if let Err(err) = tmux::kill_window(&self.config.tmux_session_name, &window_id) {
                warn!("error killing window {}: {}", window_id, err);
            }

            {
                let mut state = self.state.lock();
                state.unbind_thread(&user_id, &thread);
                state.remove_window_state(&window_id);
                state.remove_group_chat_id(&user_id, &thread);
            }

            self.remove_session_tracking(&window_id, true);
        }

        self.state.lock().remove_project(&thread);

        let worktree = self.state.lock().worktree_info(&thread).cloned();
        if let Some(info) = worktree {
            if !info.worktree_dir.is_empty() && !info.is_merge_topic {
                if let Err(err) = git::worktree_remove(&info.repo_root, &info.worktree_dir) {
                    warn!("error removing worktree {}: {}", info.worktree_dir, err);
                }
                if let Err(err) = git::delete_branch(&info.repo_root, &info.branch) {
                    warn!("error deleting branch {}: {}", info.branch, err);
                }
            }
            self.state.lock().remove_worktree_info(&thread);
            cleaned = true;
        }

        if cleaned {
            self.save_state();
            info!("topic {} closed: cleaned up bindings and killed window", thread_id);
        }
    }

    /// Drop monitor tracking for every session key owned by a window,
    /// optionally removing the session-map entries too.
    pub(crate) fn remove_session_tracking(&self, window_id: &str, remove_map_entries: bool) {
        let path = self.config.session_map_path();
        let Ok(map) = session_map::load(&path) else {
            return;
        };
        for key in map.keys() {
            if window_id_from_key(key) == window_id {
                self.monitor_state
                    .lock()
                    .expect("monitor state lock")
                    .remove_session(key);
                if remove_map_entries
                    && let Err(err) = session_map::remove_entry(&path, key)
                {
                    warn!("error removing session map entry {}: {}", key, err);
                }
            }
        }
    }

    /// Environment injected into new Claude windows when the task tracker is
    /// wired up.
    pub(crate) fn minuano_window_env(&self, window_name: &str) -> HashMap<String, String> {
        let mut env = HashMap::new();
        if self.config.minuano_db.is_empty() {
            return env;
        }
        env.insert("DATABASE_URL".into(), self.config.minuano_db.clone());
        env.insert("AGENT_ID".into(), format!("tramuntana-{window_name}"));
        if !self.config.minuano_scripts_dir.is_empty() {
            env.insert(
                "PATH".into(),
                format!("$PATH:{}", self.config.minuano_scripts_dir),
            );
        }
        env
    }
}

/// Window name derived from the directory's basename.
fn window_name_for_dir(dir: &str) -> String {
    std::path::Path::new(dir)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "claude".to_string())
}
