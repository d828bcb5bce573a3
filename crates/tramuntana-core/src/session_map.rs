//! The session map file written by the SessionStart hook.
//!
//! `session_map.json` maps `"<session-name>:<window-id>"` to the transcript
//! session id, working directory and window name. The hook is the writer;
//! this process only reads it and removes stale entries.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::io::{self, StoreError};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionMapEntry {
    pub session_id: String,
    pub cwd: String,
    pub window_name: String,
}

pub type SessionMap = HashMap<String, SessionMapEntry>;

/// Load the session map. A missing file is an empty map, not an error — the
/// hook may simply not have run yet.
pub fn load(path: &Path) -> Result<SessionMap, StoreError> {
    if !path.exists() {
        return Ok(SessionMap::new());
    }
    io::read_json(path)
}

/// Remove one entry and rewrite the file atomically. Missing files and
/// missing keys are no-ops.
pub fn remove_entry(path: &Path, key: &str) -> Result<(), StoreError> {
    let mut map = load(path)?;
    if map.remove(key).is_none() {
        return Ok(());
    }
    io::write_json_atomic(path, &map)
}

/// Merge one entry into the file, creating it if needed. This is the hook's
/// write path.
pub fn merge_entry(path: &Path, key: &str, entry: SessionMapEntry) -> Result<(), StoreError> {
    let mut map = load(path)?;
    map.insert(key.to_string(), entry);
    io::write_json_atomic(path, &map)
}

/// Extract the window id from a session map key (`"session:@5"` → `"@5"`).
/// Keys without a separator yield an empty string.
pub fn window_id_from_key(key: &str) -> &str {
    match key.rfind(':') {
        Some(idx) => &key[idx + 1..],
        None => "",
    }
}
