//! Process-wide mapping registry.
//!
//! All cross-entity references are by identifier, so the whole store
//! serializes to `state.json` as flat maps. User and thread identifiers are
//! kept as strings (they arrive as decimal text from several directions);
//! chat identifiers are the platform's `i64`.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::io::{self, StoreError};

/// Per-window session info, learned from the session map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WindowState {
    pub session_id: String,
    pub cwd: String,
    pub window_name: String,
}

/// Per-topic worktree info. `worktree_dir` is empty for merge topics, which
/// run directly in the repository root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorktreeInfo {
    pub repo_root: String,
    pub worktree_dir: String,
    pub branch: String,
    pub base_branch: String,
    pub task_id: String,
    pub is_merge_topic: bool,
}

/// A (user, thread) pair observing a window.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserThread {
    pub user_id: String,
    pub thread_id: String,
}

/// The serialized mapping registry. See the file layout in the docs for the
/// top-level key names.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct State {
    /// user → thread → window.
    bindings: HashMap<String, HashMap<String, String>>,
    window_states: HashMap<String, WindowState>,
    #[serde(rename = "groupChatIDs")]
    group_chat_ids: HashMap<String, HashMap<String, i64>>,
    project_bindings: HashMap<String, String>,
    worktrees: HashMap<String, WorktreeInfo>,
    display_names: HashMap<String, String>,
    user_window_offsets: HashMap<String, HashMap<String, u64>>,
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind_thread(&mut self, user_id: &str, thread_id: &str, window_id: &str) {
        self.bindings
            .entry(user_id.to_string())
            .or_default()
            .insert(thread_id.to_string(), window_id.to_string());
    }

    pub fn unbind_thread(&mut self, user_id: &str, thread_id: &str) {
        if let Some(threads) = self.bindings.get_mut(user_id) {
            threads.remove(thread_id);
            if threads.is_empty() {
                self.bindings.remove(user_id);
            }
        }
    }

    pub fn window_for_thread(&self, user_id: &str, thread_id: &str) -> Option<&str> {
        self.bindings
            .get(user_id)
            .and_then(|threads| threads.get(thread_id))
            .map(String::as_str)
    }

    /// Every window id referenced by at least one binding.
    pub fn all_bound_window_ids(&self) -> HashSet<String> {
        self.bindings
            .values()
            .flat_map(|threads| threads.values().cloned())
            .collect()
    }

    /// All (user, thread) pairs bound to the given window.
    pub fn find_users_for_window(&self, window_id: &str) -> Vec<UserThread> {
        let mut out = Vec::new();
        for (user_id, threads) in &self.bindings {
            for (thread_id, wid) in threads {
                if wid == window_id {
                    out.push(UserThread {
                        user_id: user_id.clone(),
                        thread_id: thread_id.clone(),
                    });
                }
            }
        }
        out
    }

    pub fn all_user_ids(&self) -> Vec<String> {
        self.bindings.keys().cloned().collect()
    }

    pub fn set_window_state(&mut self, window_id: &str, ws: WindowState) {
        self.window_states.insert(window_id.to_string(), ws);
    }

    pub fn window_state(&self, window_id: &str) -> Option<&WindowState> {
        self.window_states.get(window_id)
    }

    /// Remove everything keyed directly by a window id: its state, display
    /// name and every user's offset into it.
    pub fn remove_window_state(&mut self, window_id: &str) {
        self.window_states.remove(window_id);
        self.display_names.remove(window_id);
        for offsets in self.user_window_offsets.values_mut() {
            offsets.remove(window_id);
        }
    }

    pub fn set_group_chat_id(&mut self, user_id: &str, thread_id: &str, chat_id: i64) {
        self.group_chat_ids
            .entry(user_id.to_string())
            .or_default()
            .insert(thread_id.to_string(), chat_id);
    }

    pub fn group_chat_id(&self, user_id: &str, thread_id: &str) -> Option<i64> {
        self.group_chat_ids
            .get(user_id)
            .and_then(|threads| threads.get(thread_id))
            .copied()
    }

    pub fn remove_group_chat_id(&mut self, user_id: &str, thread_id: &str) {
        if let Some(threads) = self.group_chat_ids.get_mut(user_id) {
            threads.remove(thread_id);
            if threads.is_empty() {
                self.group_chat_ids.remove(user_id);
            }
        }
    }

    pub fn bind_project(&mut self, thread_id: &str, project: &str) {
        self.project_bindings
            .insert(thread_id.to_string(), project.to_string());
    }

    pub fn project(&self, thread_id: &str) -> Option<&str> {
        self.project_bindings.get(thread_id).map(String::as_str)
    }

    pub fn remove_project(&mut self, thread_id: &str) {
        self.project_bindings.remove(thread_id);
    }

    pub fn set_worktree_info(&mut self, thread_id: &str, info: WorktreeInfo) {
        self.worktrees.insert(thread_id.to_string(), info);
    }

    pub fn worktree_info(&self, thread_id: &str) -> Option<&WorktreeInfo> {
        self.worktrees.get(thread_id)
    }

    pub fn remove_worktree_info(&mut self, thread_id: &str) {
        self.worktrees.remove(thread_id);
    }

    pub fn all_worktree_thread_ids(&self) -> Vec<String> {
        self.worktrees.keys().cloned().collect()
    }

    pub fn set_window_display_name(&mut self, window_id: &str, name: &str) {
        self.display_names
            .insert(window_id.to_string(), name.to_string());
    }

    pub fn window_display_name(&self, window_id: &str) -> Option<&str> {
        self.display_names.get(window_id).map(String::as_str)
    }

    pub fn set_user_window_offset(&mut self, user_id: &str, window_id: &str, offset: u64) {
        self.user_window_offsets
            .entry(user_id.to_string())
            .or_default()
            .insert(window_id.to_string(), offset);
    }

    /// Zero when the user has never observed the window.
    pub fn user_window_offset(&self, user_id: &str, window_id: &str) -> u64 {
        self.user_window_offsets
            .get(user_id)
            .and_then(|offsets| offsets.get(window_id))
            .copied()
            .unwrap_or(0)
    }

    /// Move every reference from `old_id` to `new_id`: bindings, window
    /// state, display name and per-user offsets. Used by recovery when a
    /// window is re-resolved by display name after a multiplexer restart.
    pub fn re_resolve_window(&mut self, old_id: &str, new_id: &str) {
        let saved_ws = self.window_states.get(old_id).cloned();
        let saved_name = self.display_names.get(old_id).cloned();

        let mut saved_offsets: Vec<(String, u64)> = Vec::new();
        for user_id in self.all_user_ids() {
            let offset = self.user_window_offset(&user_id, old_id);
            if offset > 0 {
                saved_offsets.push((user_id, offset));
            }
        }

        for ut in self.find_users_for_window(old_id) {
            self.unbind_thread(&ut.user_id, &ut.thread_id);
            self.bind_thread(&ut.user_id, &ut.thread_id, new_id);
        }

        self.remove_window_state(old_id);

        if let Some(ws) = saved_ws {
            self.set_window_state(new_id, ws);
        }
        if let Some(name) = saved_name {
            self.set_window_display_name(new_id, &name);
        }
        for (user_id, offset) in saved_offsets {
            self.set_user_window_offset(&user_id, new_id, offset);
        }
    }
}

/// The shared store: one lock around the whole `State`, persisted with an
/// atomic replace. Callers lock, mutate, drop the guard, then `save()` —
/// the guard must never be held across an await point.
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    inner: Mutex<State>,
}

impl StateStore {
    /// Load the store from disk; a missing file starts empty.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let state = if path.exists() {
            io::read_json(path)?
        } else {
            State::new()
        };
        Ok(Self {
            path: path.to_path_buf(),
            inner: Mutex::new(state),
        })
    }

    pub fn lock(&self) -> MutexGuard<'_, State> {
        self.inner.lock().expect("state lock poisoned")
    }

    /// Persist the current state atomically.
    pub fn save(&self) -> Result<(), StoreError> {
        let guard = self.lock();
        io::write_json_atomic(&self.path, &*guard)
    }
}
