//! Environment-based configuration.
//!
//! All options come from the process environment; `serve --config <path>`
//! loads a `.env`-style file first (existing variables win, matching the
//! original deployment behavior).

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::home;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    MissingVar(&'static str),

    #[error("invalid value for {var}: {value}")]
    InvalidValue { var: &'static str, value: String },

    #[error("cannot create state directory {path}: {source}")]
    StateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot read config file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Runtime configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub telegram_bot_token: String,
    pub allowed_users: Vec<i64>,
    pub allowed_groups: Vec<i64>,
    pub tramuntana_dir: PathBuf,
    pub tmux_session_name: String,
    pub claude_command: String,
    pub monitor_poll_interval: f64,
    pub minuano_bin: String,
    pub minuano_db: String,
    pub minuano_scripts_dir: String,
    pub approvals_topic_id: i64,
    pub queue_topic_id: i64,
    pub default_project: String,
}

impl Config {
    /// Load configuration from the environment, optionally loading a
    /// `.env`-style file first. The state directory is created if missing.
    pub fn load(env_file: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = env_file {
            load_env_file(path)?;
        }

        let telegram_bot_token = require("TELEGRAM_BOT_TOKEN")?;
        let allowed_users = parse_int_list(&require("ALLOWED_USERS")?)
            .map_err(|value| ConfigError::InvalidValue {
                var: "ALLOWED_USERS",
                value,
            })?;

        let allowed_groups = match optional("ALLOWED_GROUPS") {
            Some(raw) if !raw.trim().is_empty() => {
                parse_int_list(&raw).map_err(|value| ConfigError::InvalidValue {
                    var: "ALLOWED_GROUPS",
                    value,
                })?
            }
            _ => Vec::new(),
        };

        let tramuntana_dir =
            home::expand(&optional("TRAMUNTANA_DIR").unwrap_or_else(|| "~/.tramuntana".into()));
        std::fs::create_dir_all(&tramuntana_dir).map_err(|source| ConfigError::StateDir {
            path: tramuntana_dir.clone(),
            source,
        })?;

        let monitor_poll_interval = match optional("MONITOR_POLL_INTERVAL") {
            Some(raw) => raw
                .trim()
                .parse::<f64>()
                .map_err(|_| ConfigError::InvalidValue {
                    var: "MONITOR_POLL_INTERVAL",
                    value: raw,
                })?,
            None => 2.0,
        };

        let topic_id = |var: &'static str| -> Result<i64, ConfigError> {
            match optional(var) {
                Some(raw) if !raw.trim().is_empty() => {
                    raw.trim()
                        .parse::<i64>()
                        .map_err(|_| ConfigError::InvalidValue { var, value: raw })
                }
                _ => Ok(0),
            }
        };

        Ok(Config {
            telegram_bot_token,
            allowed_users,
            allowed_groups,
            tramuntana_dir,
            tmux_session_name: optional("TMUX_SESSION_NAME")
                .unwrap_or_else(|| "tramuntana".into()),
            claude_command: optional("CLAUDE_COMMAND").unwrap_or_else(|| "claude".into()),
            monitor_poll_interval,
            minuano_bin: optional("MINUANO_BIN").unwrap_or_else(|| "minuano".into()),
            minuano_db: optional("MINUANO_DB").unwrap_or_default(),
            minuano_scripts_dir: optional("MINUANO_SCRIPTS_DIR").unwrap_or_default(),
            approvals_topic_id: topic_id("TRAMUNTANA_APPROVALS_TOPIC_ID")?,
            queue_topic_id: topic_id("TRAMUNTANA_QUEUE_TOPIC_ID")?,
            default_project: optional("TRAMUNTANA_DEFAULT_PROJECT").unwrap_or_default(),
        })
    }

    pub fn is_allowed_user(&self, user_id: i64) -> bool {
        self.allowed_users.contains(&user_id)
    }

    /// Empty group list means every group is allowed.
    pub fn is_allowed_group(&self, chat_id: i64) -> bool {
        self.allowed_groups.is_empty() || self.allowed_groups.contains(&chat_id)
    }

    /// Whether the minuano task tracker integration is configured.
    pub fn minuano_enabled(&self) -> bool {
        !self.minuano_db.is_empty()
    }

    pub fn state_path(&self) -> PathBuf {
        self.tramuntana_dir.join("state.json")
    }

    pub fn session_map_path(&self) -> PathBuf {
        self.tramuntana_dir.join("session_map.json")
    }

    pub fn monitor_state_path(&self) -> PathBuf {
        self.tramuntana_dir.join("monitor_state.json")
    }
}

fn require(var: &'static str) -> Result<String, ConfigError> {
    match optional(var) {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::MissingVar(var)),
    }
}

fn optional(var: &str) -> Option<String> {
    std::env::var(var).ok()
}

/// Parse a comma-separated list of integers. Empty input is an error.
fn parse_int_list(raw: &str) -> Result<Vec<i64>, String> {
    let mut out = Vec::new();
    for part in raw.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        out.push(part.parse::<i64>().map_err(|_| raw.to_string())?);
    }
    if out.is_empty() {
        return Err(raw.to_string());
    }
    Ok(out)
}

/// Load `KEY=VALUE` lines from an env file into the process environment.
/// Variables that are already set are left alone. Blank lines and `#`
/// comments are skipped.
fn load_env_file(path: &Path) -> Result<(), ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::EnvFile {
        path: path.to_path_buf(),
        source,
    })?;

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() || std::env::var_os(key).is_some() {
            continue;
        }
        let value = value.trim().trim_matches('"');
        unsafe { std::env::set_var(key, value) };
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_VARS: &[&str] = &[
        "TELEGRAM_BOT_TOKEN",
        "ALLOWED_USERS",
        "ALLOWED_GROUPS",
        "TRAMUNTANA_DIR",
        "TMUX_SESSION_NAME",
        "CLAUDE_COMMAND",
        "MONITOR_POLL_INTERVAL",
        "MINUANO_BIN",
        "MINUANO_DB",
        "MINUANO_SCRIPTS_DIR",
        "TRAMUNTANA_APPROVALS_TOPIC_ID",
        "TRAMUNTANA_QUEUE_TOPIC_ID",
        "TRAMUNTANA_DEFAULT_PROJECT",
    ];

    fn clear_env() {
        for var in ALL_VARS {
            unsafe { std::env::remove_var(var) };
        }
    }

    fn set(var: &str, value: &str) {
        unsafe { std::env::set_var(var, value) };
    }

    #[test]
    #[serial_test::serial]
    fn requires_token() {
        clear_env();
        set("ALLOWED_USERS", "123");
        assert!(matches!(
            Config::load(None),
            Err(ConfigError::MissingVar("TELEGRAM_BOT_TOKEN"))
        ));
    }

    #[test]
    #[serial_test::serial]
    fn requires_allowed_users() {
        clear_env();
        set("TELEGRAM_BOT_TOKEN", "test-token");
        assert!(matches!(
            Config::load(None),
            Err(ConfigError::MissingVar("ALLOWED_USERS"))
        ));
    }

    #[test]
    #[serial_test::serial]
    fn defaults() {
        clear_env();
        let dir = tempfile::TempDir::new().unwrap();
        set("TELEGRAM_BOT_TOKEN", "test-token");
        set("ALLOWED_USERS", "123,456");
        set("TRAMUNTANA_DIR", dir.path().to_str().unwrap());

        let cfg = Config::load(None).unwrap();
        assert_eq!(cfg.telegram_bot_token, "test-token");
        assert_eq!(cfg.allowed_users, vec![123, 456]);
        assert_eq!(cfg.tmux_session_name, "tramuntana");
        assert_eq!(cfg.claude_command, "claude");
        assert_eq!(cfg.monitor_poll_interval, 2.0);
        assert_eq!(cfg.minuano_bin, "minuano");
        assert!(!cfg.minuano_enabled());
        clear_env();
    }

    #[test]
    #[serial_test::serial]
    fn custom_values_and_groups() {
        clear_env();
        let dir = tempfile::TempDir::new().unwrap();
        set("TELEGRAM_BOT_TOKEN", "tok");
        set("ALLOWED_USERS", "1");
        set("ALLOWED_GROUPS", "-100123,-100456");
        set("TRAMUNTANA_DIR", dir.path().to_str().unwrap());
        set("TMUX_SESSION_NAME", "mysess");
        set("CLAUDE_COMMAND", "/usr/bin/claude");
        set("MONITOR_POLL_INTERVAL", "5.0");
        set("MINUANO_DB", "postgres://localhost/minuano");

        let cfg = Config::load(None).unwrap();
        assert_eq!(cfg.allowed_groups.len(), 2);
        assert_eq!(cfg.tmux_session_name, "mysess");
        assert_eq!(cfg.claude_command, "/usr/bin/claude");
        assert_eq!(cfg.monitor_poll_interval, 5.0);
        assert!(cfg.minuano_enabled());
        clear_env();
    }

    #[test]
    #[serial_test::serial]
    fn creates_state_dir() {
        clear_env();
        let dir = tempfile::TempDir::new().unwrap();
        let sub = dir.path().join("subdir");
        set("TELEGRAM_BOT_TOKEN", "tok");
        set("ALLOWED_USERS", "1");
        set("TRAMUNTANA_DIR", sub.to_str().unwrap());

        Config::load(None).unwrap();
        assert!(sub.is_dir());
        clear_env();
    }

    #[test]
    #[serial_test::serial]
    fn invalid_poll_interval() {
        clear_env();
        let dir = tempfile::TempDir::new().unwrap();
        set("TELEGRAM_BOT_TOKEN", "tok");
        set("ALLOWED_USERS", "1");
        set("TRAMUNTANA_DIR", dir.path().to_str().unwrap());
        set("MONITOR_POLL_INTERVAL", "notanumber");

        assert!(matches!(
            Config::load(None),
            Err(ConfigError::InvalidValue {
                var: "MONITOR_POLL_INTERVAL",
                ..
            })
        ));
        clear_env();
    }

    #[test]
    #[serial_test::serial]
    fn loads_env_file() {
        clear_env();
        let dir = tempfile::TempDir::new().unwrap();
        let env_file = dir.path().join(".env");
        std::fs::write(
            &env_file,
            format!(
                "# bot credentials\nTELEGRAM_BOT_TOKEN=file-token\nALLOWED_USERS=42\nTRAMUNTANA_DIR={}\n",
                dir.path().display()
            ),
        )
        .unwrap();

        let cfg = Config::load(Some(&env_file)).unwrap();
        assert_eq!(cfg.telegram_bot_token, "file-token");
        assert_eq!(cfg.allowed_users, vec![42]);
        clear_env();
    }

    #[test]
    fn allow_lists() {
        let cfg = Config {
            telegram_bot_token: String::new(),
            allowed_users: vec![100, 200, 300],
            allowed_groups: Vec::new(),
            tramuntana_dir: PathBuf::new(),
            tmux_session_name: String::new(),
            claude_command: String::new(),
            monitor_poll_interval: 2.0,
            minuano_bin: String::new(),
            minuano_db: String::new(),
            minuano_scripts_dir: String::new(),
            approvals_topic_id: 0,
            queue_topic_id: 0,
            default_project: String::new(),
        };

        assert!(cfg.is_allowed_user(100));
        assert!(!cfg.is_allowed_user(999));

        // Empty groups allow everything.
        assert!(cfg.is_allowed_group(-100123));

        let restricted = Config {
            allowed_groups: vec![-100123, -100456],
            ..cfg
        };
        assert!(restricted.is_allowed_group(-100123));
        assert!(!restricted.is_allowed_group(-100999));
    }

    #[test]
    fn parse_int_list_cases() {
        assert_eq!(parse_int_list("1,2,3").unwrap(), vec![1, 2, 3]);
        assert_eq!(parse_int_list(" 1 , 2 ").unwrap(), vec![1, 2]);
        assert_eq!(parse_int_list("-100").unwrap(), vec![-100]);
        assert!(parse_int_list("").is_err());
        assert!(parse_int_list("abc").is_err());
    }
}
