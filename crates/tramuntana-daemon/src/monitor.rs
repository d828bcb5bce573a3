//! Transcript monitor.
//!
//! Polls the session map and every tracked transcript file, parses newly
//! appended lines and enqueues deliveries for each user observing the owning
//! window. Offsets are byte positions into the JSONL file; a file shrinking
//! below its recorded offset means the session was cleared and reading
//! restarts from zero.

use std::collections::HashMap;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, UNIX_EPOCH};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tramuntana_core::monitor_state::MonitorState;
use tramuntana_core::session_map::{self, SessionMap};
use tramuntana_core::state::StateStore;
use tramuntana_core::text::{self, MESSAGE_LIMIT};
use tramuntana_core::transcript::{
    self, ContentKind, Entry, ParsedEvent, PendingTool, format_tool_use_summary,
};

use crate::queue::{ContentType, MessageTask, Queue};

/// Consecutive stat failures before a session is dropped.
const MAX_STAT_FAILURES: u32 = 3;

/// Tools whose invocation means Claude is waiting on an interactive prompt.
const INTERACTIVE_TOOLS: [&str; 2] = ["AskUserQuestion", "ExitPlanMode"];

/// A detected interactive prompt, forwarded to the dispatcher so it can
/// mirror the pane into the topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UiEvent {
    pub window_id: String,
    pub ui_name: String,
}

const THINKING_PREVIEW_CHARS: usize = 500;

/// Turn timing shared between the monitor and the status poller: the instant
/// a window's current turn started, consumed when its status clears.
#[derive(Debug, Default)]
pub struct TurnTimers {
    inner: Mutex<HashMap<String, Instant>>,
}

impl TurnTimers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the turn start if none is pending for this window.
    pub fn note(&self, window_id: &str) {
        self.inner
            .lock()
            .expect("turn timers lock")
            .entry(window_id.to_string())
            .or_insert_with(Instant::now);
    }

    /// Take and clear the pending turn start.
    pub fn take(&self, window_id: &str) -> Option<Instant> {
        self.inner.lock().expect("turn timers lock").remove(window_id)
    }

    pub fn clear(&self, window_id: &str) {
        self.inner.lock().expect("turn timers lock").remove(window_id);
    }
}

/// The transcript monitor task. Owns the per-session offset map; other tasks
/// reach the shared [`MonitorState`] only through its mutex.
pub struct Monitor {
    session_map_path: PathBuf,
    monitor_state_path: PathBuf,
    projects_root: PathBuf,
    poll_interval: Duration,
    state: Arc<StateStore>,
    monitor_state: Arc<Mutex<MonitorState>>,
    queue: Queue,
    timers: Arc<TurnTimers>,
    ui_tx: Option<tokio::sync::mpsc::UnboundedSender<UiEvent>>,
    last_session_map: SessionMap,
    pending: HashMap<String, HashMap<String, PendingTool>>,
    stat_failures: HashMap<String, u32>,
}

impl Monitor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session_map_path: PathBuf,
        monitor_state_path: PathBuf,
        projects_root: PathBuf,
        poll_interval: f64,
        state: Arc<StateStore>,
        monitor_state: Arc<Mutex<MonitorState>>,
        queue: Queue,
        timers: Arc<TurnTimers>,
    ) -> Self {
        Self {
            session_map_path,
            monitor_state_path,
            projects_root,
            poll_interval: Duration::from_secs_f64(poll_interval),
            state,
            monitor_state,
            queue,
            timers,
            ui_tx: None,
            last_session_map: SessionMap::new(),
            pending: HashMap::new(),
            stat_failures: HashMap::new(),
        }
    }

    /// Wire the interactive-prompt channel consumed by the dispatcher.
    pub fn set_ui_sender(&mut self, tx: tokio::sync::mpsc::UnboundedSender<UiEvent>) {
        self.ui_tx = Some(tx);
    }

    /// Poll until cancelled.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!("transcript monitor started ({:?} interval)", self.poll_interval);
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => self.poll(),
            }
        }
        info!("transcript monitor stopped");
    }

    fn poll(&mut self) {
        let map = match session_map::load(&self.session_map_path) {
            Ok(map) => map,
            Err(err) => {
                warn!("monitor: cannot load session map: {}", err);
                return;
            }
        };
        self.detect_changes(map);

        let keys: Vec<String> = self.monitor_state.lock().expect("monitor state lock").all_keys();
        for key in keys {
            self.process_session(&key);
        }

        let ms = self.monitor_state.lock().expect("monitor state lock");
        if let Err(err) = ms.save(&self.monitor_state_path) {
            warn!("monitor: cannot persist monitor state: {}", err);
        }
    }

    /// Diff the session map against the last snapshot: start tracking new
    /// sessions (once their transcript file exists) and drop removed ones.
    fn detect_changes(&mut self, new_map: SessionMap) {
        let mut effective = new_map.clone();

        for (key, entry) in &new_map {
            if self.last_session_map.contains_key(key) {
                continue;
            }
            match find_transcript(&self.projects_root, &entry.session_id) {
                Some(path) => {
                    info!(
                        "monitor: tracking session {} at {}",
                        key,
                        path.display()
                    );
                    self.monitor_state
                        .lock()
                        .expect("monitor state lock")
                        .update_offset(key, &entry.session_id, &path.to_string_lossy(), 0);
                    self.pending.insert(key.clone(), HashMap::new());
                }
                None => {
                    // Transcript not written yet; retry next cycle.
                    effective.remove(key);
                }
            }
        }

        let removed: Vec<String> = self
            .last_session_map
            .keys()
            .filter(|key| !new_map.contains_key(*key))
            .cloned()
            .collect();
        for key in removed {
            debug!("monitor: session {} removed", key);
            self.monitor_state
                .lock()
                .expect("monitor state lock")
                .remove_session(&key);
            self.pending.remove(&key);
            self.stat_failures.remove(&key);
        }

        self.last_session_map = effective;
    }

    fn process_session(&mut self, key: &str) {
        let Some(tracked) = self
            .monitor_state
            .lock()
            .expect("monitor state lock")
            .tracked(key)
            .cloned()
        else {
            return;
        };

        let path = Path::new(&tracked.file_path);
        let metadata = match std::fs::metadata(path) {
            Ok(metadata) => {
                self.stat_failures.remove(key);
                metadata
            }
            Err(err) => {
                let failures = self.stat_failures.entry(key.to_string()).or_insert(0);
                *failures += 1;
                if *failures >= MAX_STAT_FAILURES {
                    warn!("monitor: dropping session {} after stat failures: {}", key, err);
                    self.monitor_state
                        .lock()
                        .expect("monitor state lock")
                        .remove_session(key);
                    self.pending.remove(key);
                    self.stat_failures.remove(key);
                }
                return;
            }
        };

        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or(0);
        if mtime != 0 && mtime == tracked.last_modified {
            return;
        }

        let mut offset = tracked.last_byte_offset;
        if metadata.len() < offset {
            debug!("monitor: transcript {} truncated, resetting offset", key);
            offset = 0;
        }

        let Some((entries, new_offset)) = read_new_entries(path, offset) else {
            // Read or parse failure: keep the offset so the cycle retries.
            return;
        };

        let pending = self.pending.entry(key.to_string()).or_default();
        let events = transcript::parse_entries(&entries, pending);

        let window_id = session_map::window_id_from_key(key).to_string();
        if !window_id.is_empty() {
            self.announce_interactive_tools(&window_id, &entries);
            if !events.is_empty() {
                self.deliver(&window_id, offset, new_offset, &events);
            }
        }

        let mut ms = self.monitor_state.lock().expect("monitor state lock");
        ms.update_offset(key, &tracked.session_id, &tracked.file_path, new_offset);
        ms.set_modified(key, mtime);
    }

    /// Surface interactive-prompt tool calls to the dispatcher.
    fn announce_interactive_tools(&self, window_id: &str, entries: &[Entry]) {
        let Some(tx) = &self.ui_tx else {
            return;
        };
        for entry in entries {
            for block in &entry.blocks {
                if let tramuntana_core::transcript::Block::ToolUse { name, .. } = block
                    && INTERACTIVE_TOOLS.contains(&name.as_str())
                {
                    let _ = tx.send(UiEvent {
                        window_id: window_id.to_string(),
                        ui_name: name.clone(),
                    });
                }
            }
        }
    }

    /// Fan events out to every user observing the window, honoring per-user
    /// offsets so a late joiner starts at the tail instead of replaying
    /// history.
    fn deliver(&self, window_id: &str, start_offset: u64, new_offset: u64, events: &[ParsedEvent]) {
        let mut delivered_to: Vec<String> = Vec::new();
        let targets: Vec<(String, String, i64)> = {
            let state = self.state.lock();
            state
                .find_users_for_window(window_id)
                .into_iter()
                .filter_map(|ut| {
                    state
                        .group_chat_id(&ut.user_id, &ut.thread_id)
                        .map(|chat_id| (ut.user_id, ut.thread_id, chat_id))
                })
                .collect()
        };

        for (user_id, thread_id, chat_id) in targets {
            let user_offset = self.state.lock().user_window_offset(&user_id, window_id);
            if user_offset > start_offset {
                // Bound mid-transcript; catch up silently.
                continue;
            }

            let Ok(user_num) = user_id.parse::<i64>() else {
                continue;
            };
            let Ok(thread_num) = thread_id.parse::<i64>() else {
                continue;
            };

            for event in events {
                let Some((content_type, body)) = format_event(event) else {
                    continue;
                };
                self.queue.enqueue(MessageTask {
                    user_id: user_num,
                    thread_id: thread_num,
                    chat_id,
                    content_type,
                    parts: vec![body],
                    window_id: window_id.to_string(),
                });
            }
            delivered_to.push(user_id);
        }

        if !delivered_to.is_empty() {
            self.timers.note(window_id);
            let mut state = self.state.lock();
            for user_id in &delivered_to {
                state.set_user_window_offset(user_id, window_id, new_offset);
            }
            drop(state);
            if let Err(err) = self.state.save() {
                warn!("monitor: cannot persist state: {}", err);
            }
        }
    }
}

/// Read complete lines appended after `offset`. Returns the parsed entries
/// and the new offset (end of the last complete line). `None` means the read
/// or a line parse failed and the offset must not advance.
fn read_new_entries(path: &Path, offset: u64) -> Option<(Vec<Entry>, u64)> {
    let mut file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(err) => {
            warn!("monitor: cannot open {}: {}", path.display(), err);
            return None;
        }
    };
    if file.seek(SeekFrom::Start(offset)).is_err() {
        return None;
    }

    let mut buf = Vec::new();
    if let Err(err) = file.read_to_end(&mut buf) {
        warn!("monitor: cannot read {}: {}", path.display(), err);
        return None;
    }

    // Only parse up to the last newline; a partial trailing line is the
    // writer mid-append and is picked up next cycle.
    let complete = match buf.iter().rposition(|&b| b == b'\n') {
        Some(idx) => &buf[..=idx],
        None => return Some((Vec::new(), offset)),
    };

    let mut entries = Vec::new();
    for line in complete.split(|&b| b == b'\n') {
        if line.is_empty() {
            continue;
        }
        match transcript::parse_line(line) {
            Ok(Some(entry)) => entries.push(entry),
            Ok(None) => {}
            Err(err) => {
                warn!("monitor: parse error in {}: {}", path.display(), err);
                return None;
            }
        }
    }

    Some((entries, offset + complete.len() as u64))
}

/// Render a parsed event into a deliverable body. `None` drops the event
/// (user echoes and summaries are not worth a notification).
fn format_event(event: &ParsedEvent) -> Option<(ContentType, String)> {
    match event.kind {
        ContentKind::Text => {
            if event.role != "assistant" {
                return None;
            }
            Some((ContentType::Content, event.text.clone()))
        }
        ContentKind::Thinking => Some((
            ContentType::Content,
            format!("Thinking: {}", text::truncate(&event.text, THINKING_PREVIEW_CHARS)),
        )),
        ContentKind::ToolUse => Some((ContentType::ToolUse, format!("Tool: {}", event.text))),
        ContentKind::ToolResult => {
            let header = if event.tool_name.is_empty() {
                "Result".to_string()
            } else {
                format_tool_use_summary(&event.tool_name, &event.tool_input)
            };
            let body = text::truncate_tail(&event.text, MESSAGE_LIMIT);
            let rendered = if event.is_error {
                format!("{header}\nERROR: {body}")
            } else {
                format!("{header}\n{body}")
            };
            Some((ContentType::ToolResult, rendered))
        }
    }
}

/// Locate the transcript file for a session id under the Claude projects
/// root: first through each project's `sessions-index.json`, then by
/// scanning for a matching `*.jsonl` name.
pub fn find_transcript(projects_root: &Path, session_id: &str) -> Option<PathBuf> {
    let dirs = std::fs::read_dir(projects_root).ok()?;
    for dir in dirs.flatten() {
        let project_dir = dir.path();
        if !project_dir.is_dir() {
            continue;
        }

        let index_path = project_dir.join("sessions-index.json");
        if let Some(path) = search_sessions_index(&index_path, session_id, &project_dir) {
            return Some(path);
        }
        if let Some(path) = search_jsonl_files(&project_dir, session_id) {
            return Some(path);
        }
    }
    None
}

fn search_sessions_index(index_path: &Path, session_id: &str, project_dir: &Path) -> Option<PathBuf> {
    let data = std::fs::read(index_path).ok()?;
    let index: serde_json::Value = serde_json::from_slice(&data).ok()?;
    index.get(session_id)?;

    let candidate = project_dir.join(format!("{session_id}.jsonl"));
    candidate.exists().then_some(candidate)
}

fn search_jsonl_files(dir: &Path, session_id: &str) -> Option<PathBuf> {
    let entries = std::fs::read_dir(dir).ok()?;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("jsonl")
            && path.file_stem().and_then(|s| s.to_str()) == Some(session_id)
        {
            return Some(path);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::ChatSender;
    use async_trait::async_trait;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;
    use tramuntana_core::flood::FloodControl;

    struct NullSender;

    #[async_trait]
    impl ChatSender for NullSender {
        async fn send(&self, _: i64, _: i64, _: &str) -> Result<i64, String> {
            Ok(1)
        }
        async fn edit(&self, _: i64, _: i64, _: &str) -> Result<(), String> {
            Ok(())
        }
        async fn delete(&self, _: i64, _: i64) -> Result<(), String> {
            Ok(())
        }
    }

    fn test_monitor(dir: &TempDir) -> Monitor {
        let state = Arc::new(StateStore::load(&dir.path().join("state.json")).unwrap());
        let queue = Queue::new(
            Arc::new(NullSender),
            Arc::new(FloodControl::new()),
            CancellationToken::new(),
        );
        Monitor::new(
            dir.path().join("session_map.json"),
            dir.path().join("monitor_state.json"),
            dir.path().join("projects"),
            2.0,
            state,
            Arc::new(Mutex::new(MonitorState::new())),
            queue,
            Arc::new(TurnTimers::new()),
        )
    }

    #[tokio::test]
    async fn truncation_resets_offset() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.jsonl");
        std::fs::write(
            &path,
            "{\"type\":\"assistant\",\"message\":{\"content\":\"hello\"}}\n",
        )
        .unwrap();

        let mut monitor = test_monitor(&dir);
        // Offset beyond the file size simulates a /clear truncation.
        monitor
            .monitor_state
            .lock()
            .unwrap()
            .update_offset("test:@1", "test-session", &path.to_string_lossy(), 99_999);

        monitor.process_session("test:@1");

        let ms = monitor.monitor_state.lock().unwrap();
        let tracked = ms.tracked("test:@1").unwrap();
        assert_ne!(tracked.last_byte_offset, 99_999);
        assert_eq!(tracked.last_byte_offset, path.metadata().unwrap().len());
    }

    #[tokio::test]
    async fn unchanged_mtime_skips_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.jsonl");
        std::fs::write(
            &path,
            "{\"type\":\"assistant\",\"message\":{\"content\":\"hello\"}}\n",
        )
        .unwrap();

        let mut monitor = test_monitor(&dir);
        monitor
            .monitor_state
            .lock()
            .unwrap()
            .update_offset("test:@1", "s", &path.to_string_lossy(), 0);

        monitor.process_session("test:@1");
        let first = monitor
            .monitor_state
            .lock()
            .unwrap()
            .tracked("test:@1")
            .cloned()
            .unwrap();
        assert!(first.last_byte_offset > 0);

        // Second pass with the same mtime: nothing changes.
        monitor.process_session("test:@1");
        let second = monitor
            .monitor_state
            .lock()
            .unwrap()
            .tracked("test:@1")
            .cloned()
            .unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn removed_session_is_dropped() {
        let dir = TempDir::new().unwrap();
        let mut monitor = test_monitor(&dir);

        monitor
            .monitor_state
            .lock()
            .unwrap()
            .update_offset("old:@1", "old", "/some/path", 100);
        monitor.last_session_map.insert(
            "old:@1".into(),
            tramuntana_core::session_map::SessionMapEntry {
                session_id: "old".into(),
                ..Default::default()
            },
        );

        monitor.detect_changes(SessionMap::new());
        assert!(monitor.monitor_state.lock().unwrap().tracked("old:@1").is_none());
    }

    #[tokio::test]
    async fn stat_failures_drop_session_after_three() {
        let dir = TempDir::new().unwrap();
        let mut monitor = test_monitor(&dir);
        monitor
            .monitor_state
            .lock()
            .unwrap()
            .update_offset("gone:@2", "gone", "/nonexistent/gone.jsonl", 0);

        for _ in 0..MAX_STAT_FAILURES {
            monitor.process_session("gone:@2");
        }
        assert!(monitor.monitor_state.lock().unwrap().tracked("gone:@2").is_none());
    }

    #[test]
    fn find_transcript_via_sessions_index() {
        let dir = TempDir::new().unwrap();
        let project = dir.path().join("test-project");
        std::fs::create_dir_all(&project).unwrap();
        std::fs::write(
            project.join("sessions-index.json"),
            r#"{"test-session-id": {"created": "2024-01-01"}}"#,
        )
        .unwrap();
        std::fs::write(project.join("test-session-id.jsonl"), "{}").unwrap();

        let found = find_transcript(dir.path(), "test-session-id").unwrap();
        assert!(found.ends_with("test-session-id.jsonl"));
    }

    #[test]
    fn find_transcript_by_file_scan() {
        let dir = TempDir::new().unwrap();
        let project = dir.path().join("proj");
        std::fs::create_dir_all(&project).unwrap();
        std::fs::write(project.join("abc-123.jsonl"), "{}").unwrap();
        std::fs::write(project.join("other.jsonl"), "{}").unwrap();

        assert!(find_transcript(dir.path(), "abc-123").is_some());
        assert!(find_transcript(dir.path(), "nonexistent").is_none());
    }

    #[test]
    fn partial_trailing_line_not_consumed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("partial.jsonl");
        let complete = "{\"type\":\"assistant\",\"message\":{\"content\":\"done\"}}\n";
        std::fs::write(&path, format!("{complete}{{\"type\":\"assi")).unwrap();

        let (entries, new_offset) = read_new_entries(&path, 0).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(new_offset, complete.len() as u64);
    }

    #[test]
    fn tool_result_event_formatting() {
        let event = ParsedEvent {
            role: "user",
            kind: ContentKind::ToolResult,
            text: "pkg main".into(),
            tool_name: "Read".into(),
            tool_input: "main.go".into(),
            is_error: false,
        };
        let (kind, body) = format_event(&event).unwrap();
        assert_eq!(kind, ContentType::ToolResult);
        assert_eq!(body, "**Read**(main.go)\npkg main");
    }

    #[test]
    fn user_text_echo_is_dropped() {
        let event = ParsedEvent {
            role: "user",
            kind: ContentKind::Text,
            text: "hello".into(),
            tool_name: String::new(),
            tool_input: String::new(),
            is_error: false,
        };
        assert!(format_event(&event).is_none());
    }
}
