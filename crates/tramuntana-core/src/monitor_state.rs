//! Transcript monitor offsets, persisted to `monitor_state.json`.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::io::{self, StoreError};

/// Per-session-key tracking record. `last_modified` is the file's mtime in
/// whole seconds since the epoch; a zero means the file has not been statted
/// yet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TrackedSession {
    pub session_id: String,
    pub file_path: String,
    pub last_byte_offset: u64,
    pub last_modified: u64,
}

/// In-memory offset table for the transcript monitor. The daemon shares it
/// behind a mutex: the monitor advances offsets, the dispatcher removes
/// sessions on `/c_clear` and topic close.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MonitorState {
    sessions: HashMap<String, TrackedSession>,
}

impl MonitorState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> Result<Self, StoreError> {
        if !path.exists() {
            return Ok(Self::new());
        }
        io::read_json(path)
    }

    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        io::write_json_atomic(path, self)
    }

    pub fn update_offset(&mut self, key: &str, session_id: &str, file_path: &str, offset: u64) {
        let tracked = self.sessions.entry(key.to_string()).or_default();
        tracked.session_id = session_id.to_string();
        tracked.file_path = file_path.to_string();
        tracked.last_byte_offset = offset;
    }

    pub fn set_modified(&mut self, key: &str, modified: u64) {
        if let Some(tracked) = self.sessions.get_mut(key) {
            tracked.last_modified = modified;
        }
    }

    pub fn tracked(&self, key: &str) -> Option<&TrackedSession> {
        self.sessions.get(key)
    }

    pub fn remove_session(&mut self, key: &str) {
        self.sessions.remove(key);
    }

    pub fn all_keys(&self) -> Vec<String> {
        self.sessions.keys().cloned().collect()
    }
}
