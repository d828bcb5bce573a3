//! `/p_history`: paginated transcript browsing with Older / Newer buttons.

use std::collections::HashMap;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::warn;

use tramuntana_core::callback;
use tramuntana_core::session_map;
use tramuntana_core::text::first_line;
use tramuntana_core::transcript::{self, ContentKind};

use crate::bot::Bot;
use crate::telegram::{CallbackQuery, InlineKeyboardButton, InlineKeyboardMarkup, Message, User};

const ENTRIES_PER_PAGE: usize = 10;

/// A flattened transcript event for display.
#[derive(Debug, Clone)]
struct HistoryEntry {
    role: &'static str,
    kind: ContentKind,
    text: String,
    tool_name: String,
    is_error: bool,
}

impl Bot {
    pub(crate) async fn handle_history_command(self: &Arc<Self>, msg: &Message, user: &User) {
        let chat_id = msg.chat.id;
        let thread_id = msg.thread_id();

        let Some(window_id) = self.resolve_window(user.id, thread_id) else {
            self.reply(chat_id, thread_id, "No session bound to this topic.").await;
            return;
        };

        let Some(path) = self.find_transcript_for_window(&window_id) else {
            self.reply(chat_id, thread_id, "No session transcript found.").await;
            return;
        };

        let entries = read_all_entries(&path);
        if entries.is_empty() {
            self.reply(chat_id, thread_id, "Session transcript is empty.").await;
            return;
        }

        // Open on the newest page.
        let total_pages = entries.len().div_ceil(ENTRIES_PER_PAGE);
        let page = total_pages - 1;

        let text = format_history_page(&entries, page, &window_id);
        match build_history_keyboard(&window_id, page, total_pages) {
            Some(keyboard) => {
                if let Err(err) = self.send_with_keyboard(chat_id, thread_id, &text, &keyboard).await
                {
                    warn!("error sending history: {}", err);
                }
            }
            None => self.reply(chat_id, thread_id, &text).await,
        }
    }

    pub(crate) async fn handle_history_callback(self: &Arc<Self>, cq: &CallbackQuery, data: &str) {
        let Some((page, window_id)) = callback::parse_hist(data) else {
            return;
        };
        let Some(message) = &cq.message else {
            return;
        };
        let Some(path) = self.find_transcript_for_window(window_id) else {
            return;
        };

        let entries = read_all_entries(&path);
        if entries.is_empty() {
            return;
        }

        let total_pages = entries.len().div_ceil(ENTRIES_PER_PAGE);
        let page = page.min(total_pages - 1);

        let text = format_history_page(&entries, page, window_id);
        match build_history_keyboard(window_id, page, total_pages) {
            Some(keyboard) => {
                self.edit_message_with_keyboard(message.chat.id, message.message_id, &text, &keyboard)
                    .await;
            }
            None => self.edit_message(message.chat.id, message.message_id, &text).await,
        }
    }

    /// Transcript path for a window: session map → monitor cache → scan of
    /// the Claude projects directory.
    fn find_transcript_for_window(&self, window_id: &str) -> Option<PathBuf> {
        let map = session_map::load(&self.config.session_map_path()).ok()?;
        let session_id = map.iter().find_map(|(key, entry)| {
            (session_map::window_id_from_key(key) == window_id).then(|| entry.session_id.clone())
        })?;

        {
            let ms = self.monitor_state.lock().expect("monitor state lock");
            for key in ms.all_keys() {
                if let Some(tracked) = ms.tracked(&key)
                    && tracked.session_id == session_id
                    && !tracked.file_path.is_empty()
                {
                    let path = PathBuf::from(&tracked.file_path);
                    if path.exists() {
                        return Some(path);
                    }
                }
            }
        }

        let projects = tramuntana_core::home::home_dir().ok()?.join(".claude/projects");
        crate::monitor::find_transcript(&projects, &session_id)
    }
}

/// Parse the whole transcript into display entries, pairing tools as one
/// continuous stream.
fn read_all_entries(path: &std::path::Path) -> Vec<HistoryEntry> {
    let file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(err) => {
            warn!("error opening transcript {}: {}", path.display(), err);
            return Vec::new();
        }
    };

    let mut entries = Vec::new();
    let mut pending = HashMap::new();
    let reader = std::io::BufReader::new(file);

    for line in reader.lines() {
        let Ok(line) = line else { break };
        if line.is_empty() {
            continue;
        }
        let Ok(Some(entry)) = transcript::parse_line(line.as_bytes()) else {
            continue;
        };

        for event in transcript::parse_entries(std::slice::from_ref(&entry), &mut pending) {
            entries.push(HistoryEntry {
                role: event.role,
                kind: event.kind,
                text: event.text,
                tool_name: event.tool_name,
                is_error: event.is_error,
            });
        }
    }

    entries
}

fn format_history_page(entries: &[HistoryEntry], page: usize, window_id: &str) -> String {
    let total_pages = entries.len().div_ceil(ENTRIES_PER_PAGE);
    let start = page * ENTRIES_PER_PAGE;
    let end = (start + ENTRIES_PER_PAGE).min(entries.len());

    let mut lines = vec![
        format!(
            "History [{}] — Page {}/{} ({} entries)",
            window_id,
            page + 1,
            total_pages,
            entries.len()
        ),
        String::new(),
    ];
    lines.extend(entries[start..end].iter().map(format_history_entry));
    lines.join("\n")
}

fn format_history_entry(entry: &HistoryEntry) -> String {
    match entry.kind {
        ContentKind::Text => {
            let prefix = if entry.role == "user" { "You:" } else { ">" };
            format!("{prefix} {}", first_line(&entry.text, 100))
        }
        ContentKind::ToolUse => format!("Tool: {}", first_line(&entry.text, 80)),
        ContentKind::ToolResult => {
            let line_count = entry.text.split('\n').count();
            if entry.is_error {
                format!("Result [{}]: ERROR ({} lines)", entry.tool_name, line_count)
            } else {
                format!("Result [{}]: {} lines", entry.tool_name, line_count)
            }
        }
        ContentKind::Thinking => format!("Thinking: {}", first_line(&entry.text, 60)),
    }
}

/// Older / page-counter / Newer row; `None` when one page suffices.
fn build_history_keyboard(
    window_id: &str,
    page: usize,
    total_pages: usize,
) -> Option<InlineKeyboardMarkup> {
    if total_pages <= 1 {
        return None;
    }

    let mut buttons = Vec::new();
    if page > 0 {
        buttons.push(InlineKeyboardButton::callback(
            "Older",
            callback::format_hist(page - 1, window_id),
        ));
    }
    buttons.push(InlineKeyboardButton::callback(
        format!("{}/{}", page + 1, total_pages),
        "noop",
    ));
    if page + 1 < total_pages {
        buttons.push(InlineKeyboardButton::callback(
            "Newer",
            callback::format_hist(page + 1, window_id),
        ));
    }

    Some(InlineKeyboardMarkup::new(vec![buttons]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(kind: ContentKind, role: &'static str, text: &str) -> HistoryEntry {
        HistoryEntry {
            role,
            kind,
            text: text.into(),
            tool_name: String::new(),
            is_error: false,
        }
    }

    #[test]
    fn entry_formatting() {
        assert_eq!(
            format_history_entry(&entry(ContentKind::Text, "assistant", "Hello world")),
            "> Hello world"
        );
        assert_eq!(
            format_history_entry(&entry(ContentKind::Text, "user", "User message")),
            "You: User message"
        );
        assert_eq!(
            format_history_entry(&entry(ContentKind::ToolUse, "assistant", "**Read**(file.go)")),
            "Tool: **Read**(file.go)"
        );
        assert_eq!(
            format_history_entry(&HistoryEntry {
                role: "user",
                kind: ContentKind::ToolResult,
                text: "line1\nline2\nline3".into(),
                tool_name: "Read".into(),
                is_error: false,
            }),
            "Result [Read]: 3 lines"
        );
        assert_eq!(
            format_history_entry(&HistoryEntry {
                role: "user",
                kind: ContentKind::ToolResult,
                text: "error".into(),
                tool_name: "Bash".into(),
                is_error: true,
            }),
            "Result [Bash]: ERROR (1 lines)"
        );
        assert_eq!(
            format_history_entry(&entry(ContentKind::Thinking, "assistant", "Let me consider...")),
            "Thinking: Let me consider..."
        );
    }

    #[test]
    fn keyboard_layout_per_page() {
        assert!(build_history_keyboard("@1", 0, 1).is_none());

        let first = build_history_keyboard("@1", 0, 5).unwrap();
        let row = &first.inline_keyboard[0];
        assert_eq!(row.len(), 2);
        assert_eq!(row[0].text, "1/5");
        assert_eq!(row[1].text, "Newer");

        let last = build_history_keyboard("@1", 4, 5).unwrap();
        let row = &last.inline_keyboard[0];
        assert_eq!(row.len(), 2);
        assert_eq!(row[0].text, "Older");

        let middle = build_history_keyboard("@1", 2, 5).unwrap();
        assert_eq!(middle.inline_keyboard[0].len(), 3);
    }

    #[test]
    fn page_formatting() {
        let entries: Vec<HistoryEntry> = (0..25)
            .map(|i| entry(ContentKind::Text, "assistant", &format!("Message {i}")))
            .collect();

        let text = format_history_page(&entries, 0, "@1");
        assert!(text.contains("Page 1/3"));
        for i in 0..10 {
            assert!(text.contains(&format!("Message {i}")), "missing entry {i}");
        }
        assert!(!text.contains("Message 10\n"));
    }

    #[test]
    fn read_entries_from_jsonl() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.jsonl");
        std::fs::write(
            &path,
            "{\"type\":\"assistant\",\"message\":{\"content\":[{\"type\":\"text\",\"text\":\"Hello\"}]}}\n",
        )
        .unwrap();

        let entries = read_all_entries(&path);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, ContentKind::Text);
        assert_eq!(entries[0].text, "Hello");
    }

    #[test]
    fn read_entries_missing_or_empty() {
        assert!(read_all_entries(std::path::Path::new("/nonexistent/file.jsonl")).is_empty());

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.jsonl");
        std::fs::write(&path, "").unwrap();
        assert!(read_all_entries(&path).is_empty());
    }
}
