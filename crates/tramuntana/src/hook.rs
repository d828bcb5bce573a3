//! The Claude Code SessionStart hook.
//!
//! Claude invokes the hook with a JSON payload on stdin describing the new
//! session. Running inside tmux, the hook resolves which window it lives in
//! and merges one entry into `session_map.json` — the sole channel through
//! which the daemon learns which transcript belongs to which window.

use std::io::Read;
use std::path::PathBuf;
use std::process::Command;

use anyhow::{Context, Result, bail};
use serde_json::{Value, json};

use tramuntana_core::home;
use tramuntana_core::session_map::{self, SessionMapEntry};

/// Read the hook payload from stdin and record the session mapping.
/// Outside tmux the hook is a silent no-op so plain terminal sessions are
/// unaffected.
pub fn run() -> Result<()> {
    let Ok(pane) = std::env::var("TMUX_PANE") else {
        return Ok(());
    };

    let mut input = String::new();
    std::io::stdin()
        .read_to_string(&mut input)
        .context("reading hook input")?;
    let payload: Value = serde_json::from_str(&input).context("parsing hook input")?;

    let session_id = payload
        .get("session_id")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if session_id.is_empty() {
        bail!("hook input has no session_id");
    }
    let cwd = payload
        .get("cwd")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| {
            std::env::current_dir()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_default()
        });

    let key = tmux_display(&pane, "#{session_name}:#{window_id}")?;
    let window_name = tmux_display(&pane, "#{window_name}")?;

    let path = session_map_path()?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }

    session_map::merge_entry(
        &path,
        &key,
        SessionMapEntry {
            session_id: session_id.to_string(),
            cwd,
            window_name,
        },
    )
    .context("writing session map")?;

    Ok(())
}

/// Register the hook in Claude Code's settings. Idempotent: an existing
/// tramuntana hook entry is left alone.
pub fn install() -> Result<()> {
    let settings_path = home::home_dir()?.join(".claude").join("settings.json");

    let mut settings: Value = if settings_path.exists() {
        let data = std::fs::read(&settings_path)
            .with_context(|| format!("reading {}", settings_path.display()))?;
        serde_json::from_slice(&data).context("parsing Claude settings")?
    } else {
        json!({})
    };

    let exe = std::env::current_exe().context("resolving own path")?;
    let command = format!("{} hook", exe.display());

    let hooks = settings
        .as_object_mut()
        .context("settings is not an object")?
        .entry("hooks")
        .or_insert_with(|| json!({}));
    let session_start = hooks
        .as_object_mut()
        .context("hooks is not an object")?
        .entry("SessionStart")
        .or_insert_with(|| json!([]));
    let entries = session_start
        .as_array_mut()
        .context("SessionStart is not an array")?;

    let already = entries.iter().any(|entry| {
        entry["hooks"]
            .as_array()
            .is_some_and(|hooks| {
                hooks.iter().any(|h| {
                    h["command"]
                        .as_str()
                        .is_some_and(|c| c.ends_with("tramuntana hook") || c == command)
                })
            })
    });
    if already {
        println!("SessionStart hook already installed");
        return Ok(());
    }

    entries.push(json!({
        "hooks": [{ "type": "command", "command": command }]
    }));

    if let Some(parent) = settings_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    tramuntana_core::io::write_json_atomic(&settings_path, &settings)
        .context("writing Claude settings")?;

    println!("Installed SessionStart hook: {command}");
    Ok(())
}

fn tmux_display(pane: &str, format: &str) -> Result<String> {
    let output = Command::new("tmux")
        .args(["display-message", "-p", "-t", pane, format])
        .output()
        .context("running tmux display-message")?;
    if !output.status.success() {
        bail!(
            "tmux display-message failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn session_map_path() -> Result<PathBuf> {
    let dir = match std::env::var("TRAMUNTANA_DIR") {
        Ok(dir) if !dir.trim().is_empty() => home::expand(&dir),
        _ => home::home_dir()?.join(".tramuntana"),
    };
    Ok(dir.join("session_map.json"))
}
