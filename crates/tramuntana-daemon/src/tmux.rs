//! Thin blocking wrappers around the tmux command line.
//!
//! Every wrapper targets a window as `<session>:<window-id>`. The only error
//! classification callers rely on is window-dead, recognized by a single
//! predicate on tmux's diagnostic output so an upstream wording change is a
//! one-line fix.

use std::collections::HashMap;
use std::process::Command;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TmuxError {
    #[error("window gone: {0}")]
    WindowDead(String),

    #[error("tmux {command} failed: {stderr}")]
    Command { command: String, stderr: String },

    #[error("tmux {command}: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },
}

impl TmuxError {
    pub fn is_window_dead(&self) -> bool {
        matches!(self, TmuxError::WindowDead(_))
    }
}

/// The window-dead signature in tmux diagnostics. Kept as one predicate so
/// the matcher has a single point of change.
pub fn is_window_dead_output(stderr: &str) -> bool {
    stderr.contains("can't find window") || stderr.contains("can't find pane")
}

/// A live tmux window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Window {
    pub id: String,
    pub name: String,
    pub cwd: String,
}

fn run(args: &[&str]) -> Result<String, TmuxError> {
    let command = args.join(" ");
    let output = Command::new("tmux")
        .args(args)
        .output()
        .map_err(|source| TmuxError::Spawn {
            command: command.clone(),
            source,
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if is_window_dead_output(&stderr) {
            return Err(TmuxError::WindowDead(stderr));
        }
        return Err(TmuxError::Command { command, stderr });
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

fn target(session: &str, window_id: &str) -> String {
    format!("{session}:{window_id}")
}

/// List the session's windows as (id, name, working directory).
pub fn list_windows(session: &str) -> Result<Vec<Window>, TmuxError> {
    let out = run(&[
        "list-windows",
        "-t",
        session,
        "-F",
        "#{window_id}|#{window_name}|#{pane_current_path}",
    ])?;

    let mut windows = Vec::new();
    for line in out.lines() {
        let mut parts = line.splitn(3, '|');
        let id = parts.next().unwrap_or_default();
        if id.is_empty() {
            continue;
        }
        windows.push(Window {
            id: id.to_string(),
            name: parts.next().unwrap_or_default().to_string(),
            cwd: parts.next().unwrap_or_default().to_string(),
        });
    }
    Ok(windows)
}

/// Capture a pane as text; `ansi` preserves escape sequences.
pub fn capture_pane(session: &str, window_id: &str, ansi: bool) -> Result<String, TmuxError> {
    let target = target(session, window_id);
    let mut args = vec!["capture-pane", "-p", "-t", target.as_str()];
    if ansi {
        args.push("-e");
    }
    run(&args)
}

/// Send literal text without a trailing Enter.
pub fn send_keys(session: &str, window_id: &str, text: &str) -> Result<(), TmuxError> {
    let target = target(session, window_id);
    run(&["send-keys", "-t", &target, "-l", text]).map(drop)
}

/// Send a named key (e.g. `Escape`, `Up`, `Enter`).
pub fn send_special_key(session: &str, window_id: &str, key: &str) -> Result<(), TmuxError> {
    let target = target(session, window_id);
    run(&["send-keys", "-t", &target, key]).map(drop)
}

pub fn send_enter(session: &str, window_id: &str) -> Result<(), TmuxError> {
    send_special_key(session, window_id, "Enter")
}

/// Type `text` one character at a time with `delay_ms` between keystrokes,
/// then press Enter. Claude Code's input box drops characters when fed a
/// whole line at once.
pub async fn send_keys_with_delay(
    session: &str,
    window_id: &str,
    text: &str,
    delay_ms: u64,
) -> Result<(), TmuxError> {
    let delay = Duration::from_millis(delay_ms);
    let mut buf = [0u8; 4];
    for c in text.chars() {
        send_keys(session, window_id, c.encode_utf8(&mut buf))?;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
    send_enter(session, window_id)
}

/// Create a window and return its `@id`. `command` empty means the default
/// shell; `env` entries are exported into the new window's environment.
pub fn new_window(
    session: &str,
    name: &str,
    dir: &str,
    command: &str,
    env: &HashMap<String, String>,
) -> Result<String, TmuxError> {
    let session_target = format!("{session}:");
    let mut args: Vec<String> = vec![
        "new-window".into(),
        "-t".into(),
        session_target,
        "-n".into(),
        name.into(),
        "-c".into(),
        dir.into(),
        "-P".into(),
        "-F".into(),
        "#{window_id}".into(),
    ];
    for (key, value) in env {
        args.push("-e".into());
        args.push(format!("{key}={value}"));
    }
    if !command.is_empty() {
        args.push(command.into());
    }

    let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
    let out = run(&arg_refs)?;
    Ok(out.trim().to_string())
}

pub fn rename_window(session: &str, window_id: &str, name: &str) -> Result<(), TmuxError> {
    let target = target(session, window_id);
    run(&["rename-window", "-t", &target, name]).map(drop)
}

/// Kill a window. Killing an already-dead window is a no-op.
pub fn kill_window(session: &str, window_id: &str) -> Result<(), TmuxError> {
    let target = target(session, window_id);
    match run(&["kill-window", "-t", &target]) {
        Err(TmuxError::WindowDead(_)) => Ok(()),
        other => other.map(drop),
    }
}

pub fn session_exists(session: &str) -> bool {
    Command::new("tmux")
        .args(["has-session", "-t", session])
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

/// Create the session if it does not exist yet.
pub fn ensure_session(session: &str) -> Result<(), TmuxError> {
    if session_exists(session) {
        return Ok(());
    }
    run(&["new-session", "-d", "-s", session]).map(drop)
}

/// Expand a tmux format string for a target.
pub fn display_message(target: &str, format: &str) -> Result<String, TmuxError> {
    run(&["display-message", "-p", "-t", target, format]).map(|out| out.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_dead_predicate() {
        assert!(is_window_dead_output("can't find window: @5"));
        assert!(is_window_dead_output("can't find pane: %3"));
        assert!(!is_window_dead_output("no server running"));
        assert!(!is_window_dead_output(""));
    }

    #[test]
    fn error_classification() {
        let dead = TmuxError::WindowDead("can't find window: @5".into());
        assert!(dead.is_window_dead());

        let other = TmuxError::Command {
            command: "list-windows".into(),
            stderr: "no server running".into(),
        };
        assert!(!other.is_window_dead());
    }
}
