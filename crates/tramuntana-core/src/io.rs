//! Atomic JSON file persistence.
//!
//! Every persisted file in the state directory is written to a sibling
//! temporary file and renamed into place. A partial `state.json` would poison
//! every startup, so plain `fs::write` is never used for state.

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Errors from the persistence layer.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("JSON error in {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("cannot determine home directory")]
    NoHome,
}

/// Serialize `value` as pretty JSON and atomically replace `path`.
///
/// The temporary file lives in the same directory as the target so the final
/// rename never crosses a filesystem boundary.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let data = serde_json::to_vec_pretty(value).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })?;

    let tmp = tmp_path(path);
    std::fs::write(&tmp, &data).map_err(|source| StoreError::Io {
        path: tmp.clone(),
        source,
    })?;
    std::fs::rename(&tmp, path).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Read and deserialize a JSON file.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
    let data = std::fs::read(path).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&data).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn write_then_read_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");

        let mut value = HashMap::new();
        value.insert("key".to_string(), 42u64);

        write_json_atomic(&path, &value).unwrap();
        let back: HashMap<String, u64> = read_json(&path).unwrap();
        assert_eq!(back, value);

        // No temporary file left behind.
        assert!(!dir.path().join("state.json.tmp").exists());
    }

    #[test]
    fn read_missing_file_is_io_error() {
        let err = read_json::<HashMap<String, u64>>(Path::new("/nonexistent/state.json"));
        assert!(matches!(err, Err(StoreError::Io { .. })));
    }
}
