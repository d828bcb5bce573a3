//! Bridge to the minuano task-tracker CLI.
//!
//! Everything goes through the `minuano` binary with `--json` where a typed
//! result is needed. Absence of `MINUANO_DB` disables the whole integration;
//! the bot then runs as a plain terminal bridge.

use std::process::Command;

use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MinuanoError {
    #[error("minuano {command}: {detail}")]
    Command { command: String, detail: String },

    #[error("minuano {command}: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[error("minuano {command}: bad JSON output: {source}")]
    Json {
        command: String,
        source: serde_json::Error,
    },
}

/// A tracker task as reported by `minuano status --json`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub status: String,
    #[serde(default)]
    pub claimed_by: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub body: String,
}

/// Full task detail from `minuano show --json`.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskDetail {
    pub task: Task,
}

#[derive(Debug, Clone)]
pub struct MinuanoBridge {
    bin: String,
    db_url: String,
}

impl MinuanoBridge {
    pub fn new(bin: &str, db_url: &str) -> Self {
        Self {
            bin: bin.to_string(),
            db_url: db_url.to_string(),
        }
    }

    /// Run a raw subcommand and return trimmed stdout.
    pub fn run(&self, args: &[&str]) -> Result<String, MinuanoError> {
        let command = args.join(" ");
        let mut cmd = Command::new(&self.bin);
        cmd.args(args);
        if !self.db_url.is_empty() {
            cmd.env("DATABASE_URL", &self.db_url);
        }

        let output = cmd.output().map_err(|source| MinuanoError::Spawn {
            command: command.clone(),
            source,
        })?;

        if !output.status.success() {
            let mut detail = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if detail.is_empty() {
                detail = String::from_utf8_lossy(&output.stdout).trim().to_string();
            }
            return Err(MinuanoError::Command { command, detail });
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn run_json<T: serde::de::DeserializeOwned>(&self, args: &[&str]) -> Result<T, MinuanoError> {
        let command = args.join(" ");
        let out = self.run(args)?;
        serde_json::from_str(&out).map_err(|source| MinuanoError::Json { command, source })
    }

    /// All tasks of a project.
    pub fn status(&self, project: &str) -> Result<Vec<Task>, MinuanoError> {
        self.run_json(&["status", "--project", project, "--json"])
    }

    /// Full detail for one task.
    pub fn show(&self, task_id: &str) -> Result<TaskDetail, MinuanoError> {
        self.run_json(&["show", task_id, "--json"])
    }

    /// Prompt for working a single task.
    pub fn prompt_single(&self, task_id: &str) -> Result<String, MinuanoError> {
        self.run(&["prompt", "single", task_id])
    }

    /// Prompt for the autonomous claim-work-repeat loop.
    pub fn prompt_auto(&self, project: &str) -> Result<String, MinuanoError> {
        self.run(&["prompt", "auto", "--project", project])
    }

    /// Prompt covering several tasks at once.
    pub fn prompt_batch(&self, task_ids: &[&str]) -> Result<String, MinuanoError> {
        let mut args = vec!["prompt", "batch"];
        args.extend_from_slice(task_ids);
        self.run(&args)
    }

    pub fn add_task(&self, project: &str, title: &str) -> Result<String, MinuanoError> {
        self.run(&["add", "--project", project, "--title", title])
    }

    pub fn delete(&self, task_id: &str) -> Result<(), MinuanoError> {
        self.run(&["delete", task_id]).map(drop)
    }

    pub fn unclaim(&self, task_id: &str) -> Result<(), MinuanoError> {
        self.run(&["unclaim", task_id]).map(drop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_json_shape() {
        let raw = r#"[
            {"id":"t-1","title":"Fix parser","status":"ready"},
            {"id":"t-2","title":"Ship it","status":"claimed","claimed_by":"agent-7","project_id":"game"}
        ]"#;
        let tasks: Vec<Task> = serde_json::from_str(raw).unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].status, "ready");
        assert_eq!(tasks[1].claimed_by.as_deref(), Some("agent-7"));
    }

    #[test]
    fn missing_binary_is_spawn_error() {
        let bridge = MinuanoBridge::new("/nonexistent/minuano-bin", "");
        assert!(matches!(
            bridge.run(&["status"]),
            Err(MinuanoError::Spawn { .. })
        ));
    }
}
