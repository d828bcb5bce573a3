//! Claude Code transcript parsing.
//!
//! The transcript is a JSONL stream; each line carries a `type` and a
//! `message` whose `content` is either a plain string or an array of typed
//! blocks. Tool calls and their results usually land in the same poll cycle
//! and are collapsed into a single event; a call whose result has not arrived
//! yet is carried in the pending table across cycles.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Cycles a pending tool call survives before being emitted as an orphan.
pub const PENDING_MAX_AGE: u32 = 3;

const BASH_SUMMARY_LIMIT: usize = 100;

#[derive(Error, Debug)]
pub enum TranscriptError {
    #[error("malformed transcript line: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Top-level record kind. Unknown kinds never reach an `Entry`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Assistant,
    User,
    Summary,
}

impl EntryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntryKind::Assistant => "assistant",
            EntryKind::User => "user",
            EntryKind::Summary => "summary",
        }
    }
}

/// One content block of a transcript record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Text {
        text: String,
    },
    Thinking {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: String,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        is_error: bool,
    },
}

/// A parsed transcript line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub kind: EntryKind,
    pub blocks: Vec<Block>,
}

/// A tool call waiting for its result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTool {
    pub name: String,
    pub input: String,
    pub age: u32,
}

/// Event kind delivered to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Text,
    Thinking,
    ToolUse,
    ToolResult,
}

impl ContentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ContentKind::Text => "text",
            ContentKind::Thinking => "thinking",
            ContentKind::ToolUse => "tool_use",
            ContentKind::ToolResult => "tool_result",
        }
    }
}

/// An event produced by [`parse_entries`], ready for message formatting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedEvent {
    pub role: &'static str,
    pub kind: ContentKind,
    pub text: String,
    pub tool_name: String,
    pub tool_input: String,
    pub is_error: bool,
}

#[derive(Deserialize)]
struct RawRecord {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    message: Option<RawMessage>,
}

#[derive(Deserialize)]
struct RawMessage {
    #[serde(default)]
    content: Option<Value>,
}

/// Parse one transcript line. Unknown top-level types return `Ok(None)` so an
/// upstream schema addition degrades to silence rather than error spam.
pub fn parse_line(line: &[u8]) -> Result<Option<Entry>, TranscriptError> {
    let record: RawRecord = serde_json::from_slice(line)?;

    let kind = match record.kind.as_str() {
        "assistant" => EntryKind::Assistant,
        "user" => EntryKind::User,
        "summary" => EntryKind::Summary,
        _ => return Ok(None),
    };

    let content = record.message.and_then(|m| m.content);
    let blocks = match content {
        Some(Value::String(text)) => vec![Block::Text {
            text: clean_text(&text),
        }],
        Some(Value::Array(items)) => items.iter().filter_map(parse_block).collect(),
        _ => Vec::new(),
    };

    Ok(Some(Entry { kind, blocks }))
}

fn parse_block(item: &Value) -> Option<Block> {
    match item.get("type")?.as_str()? {
        "text" => Some(Block::Text {
            text: clean_text(item.get("text")?.as_str()?),
        }),
        "thinking" => Some(Block::Thinking {
            text: item.get("thinking")?.as_str()?.to_string(),
        }),
        "tool_use" => {
            let name = item.get("name")?.as_str()?.to_string();
            let input = item
                .get("input")
                .map(|input| extract_tool_input(&name, input))
                .unwrap_or_default();
            Some(Block::ToolUse {
                id: item.get("id")?.as_str()?.to_string(),
                name,
                input,
            })
        }
        "tool_result" => Some(Block::ToolResult {
            tool_use_id: item.get("tool_use_id")?.as_str()?.to_string(),
            content: item
                .get("content")
                .map(flatten_result_content)
                .unwrap_or_default(),
            is_error: item
                .get("is_error")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        }),
        _ => None,
    }
}

/// Derive the compact human summary of a tool invocation from its input.
pub fn extract_tool_input(tool: &str, input: &Value) -> String {
    let field = |key: &str| {
        input
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };

    match tool {
        "Read" | "Write" | "Edit" => field("file_path"),
        "Bash" => {
            let command = field("command");
            let chars: Vec<char> = command.chars().collect();
            if chars.len() > BASH_SUMMARY_LIMIT {
                let mut out: String = chars[..BASH_SUMMARY_LIMIT].iter().collect();
                out.push_str("...");
                out
            } else {
                command
            }
        }
        "Grep" | "Glob" => field("pattern"),
        "Task" => field("description"),
        "WebFetch" => field("url"),
        "WebSearch" => field("query"),
        "Skill" => field("skill"),
        "AskUserQuestion" => "interactive".to_string(),
        "ExitPlanMode" => "plan".to_string(),
        _ => String::new(),
    }
}

/// Tool result content arrives as a string or as an array of text fragments;
/// fragments are joined by newline.
fn flatten_result_content(content: &Value) -> String {
    match content {
        Value::String(s) => clean_text(s),
        Value::Array(items) => {
            let parts: Vec<&str> = items
                .iter()
                .filter_map(|item| item.get("text").and_then(Value::as_str))
                .collect();
            clean_text(&parts.join("\n"))
        }
        _ => String::new(),
    }
}

fn reminder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<system-reminder>.*?</system-reminder>").unwrap())
}

/// Strip platform reminder tags injected into message content.
pub fn clean_text(text: &str) -> String {
    if !text.contains("<system-reminder>") {
        return text.to_string();
    }
    reminder_re().replace_all(text, "").into_owned()
}

/// `**Name**(input)`.
pub fn format_tool_use_summary(name: &str, input: &str) -> String {
    format!("**{name}**({input})")
}

/// Turn a batch of entries into delivery events, pairing tool calls with
/// their results through `pending`.
///
/// - A tool_use is inserted into `pending` and emits nothing.
/// - A tool_result whose id is pending emits one combined event carrying the
///   paired tool name and input; an unpaired result is emitted alone.
/// - After the batch, pending calls age by one cycle; anything older than
///   [`PENDING_MAX_AGE`] is emitted as an orphan use.
pub fn parse_entries(
    entries: &[Entry],
    pending: &mut HashMap<String, PendingTool>,
) -> Vec<ParsedEvent> {
    let mut events = Vec::new();

    for entry in entries {
        let role = entry.kind.as_str();
        for block in &entry.blocks {
            match block {
                Block::Text { text } => {
                    if !text.trim().is_empty() {
                        events.push(ParsedEvent {
                            role,
                            kind: ContentKind::Text,
                            text: text.clone(),
                            tool_name: String::new(),
                            tool_input: String::new(),
                            is_error: false,
                        });
                    }
                }
                Block::Thinking { text } => events.push(ParsedEvent {
                    role,
                    kind: ContentKind::Thinking,
                    text: text.clone(),
                    tool_name: String::new(),
                    tool_input: String::new(),
                    is_error: false,
                }),
                Block::ToolUse { id, name, input } => {
                    pending.insert(
                        id.clone(),
                        PendingTool {
                            name: name.clone(),
                            input: input.clone(),
                            age: 0,
                        },
                    );
                }
                Block::ToolResult {
                    tool_use_id,
                    content,
                    is_error,
                } => {
                    let paired = pending.remove(tool_use_id);
                    let (tool_name, tool_input) = paired
                        .map(|p| (p.name, p.input))
                        .unwrap_or((String::new(), String::new()));
                    events.push(ParsedEvent {
                        role,
                        kind: ContentKind::ToolResult,
                        text: content.clone(),
                        tool_name,
                        tool_input,
                        is_error: *is_error,
                    });
                }
            }
        }
    }

    // Age the survivors; emit calls that have waited too long as orphans.
    let mut orphans: Vec<String> = Vec::new();
    for (id, tool) in pending.iter_mut() {
        tool.age += 1;
        if tool.age > PENDING_MAX_AGE {
            orphans.push(id.clone());
        }
    }
    for id in orphans {
        if let Some(tool) = pending.remove(&id) {
            events.push(ParsedEvent {
                role: "assistant",
                kind: ContentKind::ToolUse,
                text: format_tool_use_summary(&tool.name, &tool.input),
                tool_name: tool.name,
                tool_input: tool.input,
                is_error: false,
            });
        }
    }

    events
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(s: &str) -> Entry {
        parse_line(s.as_bytes()).unwrap().unwrap()
    }

    #[test]
    fn assistant_text() {
        let entry = line(r#"{"type":"assistant","message":{"content":[{"type":"text","text":"Hello world"}]}}"#);
        assert_eq!(entry.kind, EntryKind::Assistant);
        assert_eq!(
            entry.blocks,
            vec![Block::Text {
                text: "Hello world".into()
            }]
        );
    }

    #[test]
    fn user_string_content() {
        let entry = line(r#"{"type":"user","message":{"content":"fix the bug"}}"#);
        assert_eq!(entry.kind, EntryKind::User);
        assert_eq!(
            entry.blocks,
            vec![Block::Text {
                text: "fix the bug".into()
            }]
        );
    }

    #[test]
    fn tool_use_block() {
        let entry = line(
            r#"{"type":"assistant","message":{"content":[{"type":"tool_use","id":"tu_123","name":"Read","input":{"file_path":"/tmp/test.go"}}]}}"#,
        );
        assert_eq!(
            entry.blocks,
            vec![Block::ToolUse {
                id: "tu_123".into(),
                name: "Read".into(),
                input: "/tmp/test.go".into()
            }]
        );
    }

    #[test]
    fn tool_result_block() {
        let entry = line(
            r#"{"type":"user","message":{"content":[{"type":"tool_result","tool_use_id":"tu_123","content":"file contents here","is_error":false}]}}"#,
        );
        assert_eq!(
            entry.blocks,
            vec![Block::ToolResult {
                tool_use_id: "tu_123".into(),
                content: "file contents here".into(),
                is_error: false
            }]
        );
    }

    #[test]
    fn tool_result_error_flag() {
        let entry = line(
            r#"{"type":"user","message":{"content":[{"type":"tool_result","tool_use_id":"tu_err","content":"command failed","is_error":true}]}}"#,
        );
        assert!(matches!(
            &entry.blocks[0],
            Block::ToolResult { is_error: true, .. }
        ));
    }

    #[test]
    fn thinking_block() {
        let entry = line(
            r#"{"type":"assistant","message":{"content":[{"type":"thinking","thinking":"Let me think about this..."}]}}"#,
        );
        assert_eq!(
            entry.blocks,
            vec![Block::Thinking {
                text: "Let me think about this...".into()
            }]
        );
    }

    #[test]
    fn summary_kind() {
        let entry = line(r#"{"type":"summary","message":{"content":"summary text"}}"#);
        assert_eq!(entry.kind, EntryKind::Summary);
    }

    #[test]
    fn unknown_type_is_none() {
        let result = parse_line(br#"{"type":"system","message":{}}"#).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn invalid_json_is_error() {
        assert!(parse_line(b"not json").is_err());
    }

    #[test]
    fn multiple_blocks_preserve_order() {
        let entry = line(
            r#"{"type":"assistant","message":{"content":[{"type":"text","text":"Looking at the file"},{"type":"tool_use","id":"tu_1","name":"Read","input":{"file_path":"main.go"}}]}}"#,
        );
        assert_eq!(entry.blocks.len(), 2);
        assert!(matches!(entry.blocks[0], Block::Text { .. }));
        assert!(matches!(entry.blocks[1], Block::ToolUse { .. }));
    }

    #[test]
    fn tool_input_summaries() {
        let cases: &[(&str, &str, &str)] = &[
            ("Read", r#"{"file_path":"/tmp/file.go"}"#, "/tmp/file.go"),
            ("Write", r#"{"file_path":"/tmp/out.txt"}"#, "/tmp/out.txt"),
            ("Edit", r#"{"file_path":"/tmp/edit.go"}"#, "/tmp/edit.go"),
            ("Bash", r#"{"command":"git status"}"#, "git status"),
            ("Grep", r#"{"pattern":"TODO"}"#, "TODO"),
            ("Glob", r#"{"pattern":"**/*.go"}"#, "**/*.go"),
            ("Task", r#"{"description":"search for code"}"#, "search for code"),
            ("WebFetch", r#"{"url":"https://example.com"}"#, "https://example.com"),
            ("WebSearch", r#"{"query":"golang error handling"}"#, "golang error handling"),
            ("AskUserQuestion", r#"{"questions":[]}"#, "interactive"),
            ("ExitPlanMode", r#"{}"#, "plan"),
            ("Skill", r#"{"skill":"commit"}"#, "commit"),
            ("Unknown", r#"{"foo":"bar"}"#, ""),
        ];
        for (tool, input, want) in cases {
            let value: Value = serde_json::from_str(input).unwrap();
            assert_eq!(extract_tool_input(tool, &value), *want, "tool {tool}");
        }
    }

    #[test]
    fn bash_summary_truncated() {
        let long = "x".repeat(120);
        let value = serde_json::json!({ "command": long });
        let got = extract_tool_input("Bash", &value);
        assert_eq!(got.chars().count(), BASH_SUMMARY_LIMIT + 3);
        assert!(got.ends_with("..."));
    }

    #[test]
    fn pairing_same_batch_collapses() {
        let mut pending = HashMap::new();
        let use_entry = line(
            r#"{"type":"assistant","message":{"content":[{"type":"tool_use","id":"tu_abc","name":"Read","input":{"file_path":"main.go"}}]}}"#,
        );
        let result_entry = line(
            r#"{"type":"user","message":{"content":[{"type":"tool_result","tool_use_id":"tu_abc","content":"package main\n"}]}}"#,
        );

        let events = parse_entries(&[use_entry, result_entry], &mut pending);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, ContentKind::ToolResult);
        assert_eq!(events[0].tool_name, "Read");
        assert_eq!(events[0].tool_input, "main.go");
        assert!(pending.is_empty());
    }

    #[test]
    fn pairing_cross_cycle() {
        let mut pending = HashMap::new();

        let use_entry = line(
            r#"{"type":"assistant","message":{"content":[{"type":"tool_use","id":"tu_cross","name":"Bash","input":{"command":"ls"}}]}}"#,
        );
        let events = parse_entries(&[use_entry], &mut pending);
        assert!(events.is_empty());
        assert_eq!(pending.len(), 1);

        let result_entry = line(
            r#"{"type":"user","message":{"content":[{"type":"tool_result","tool_use_id":"tu_cross","content":"file1\nfile2\n"}]}}"#,
        );
        let events = parse_entries(&[result_entry], &mut pending);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].tool_name, "Bash");
        assert!(pending.is_empty());
    }

    #[test]
    fn orphan_emitted_after_max_age() {
        let mut pending = HashMap::new();
        let use_entry = line(
            r#"{"type":"assistant","message":{"content":[{"type":"tool_use","id":"tu_lost","name":"Bash","input":{"command":"sleep 600"}}]}}"#,
        );
        parse_entries(&[use_entry], &mut pending);

        let mut orphaned = Vec::new();
        for _ in 0..PENDING_MAX_AGE {
            orphaned = parse_entries(&[], &mut pending);
        }
        assert_eq!(orphaned.len(), 1);
        assert_eq!(orphaned[0].kind, ContentKind::ToolUse);
        assert_eq!(orphaned[0].text, "**Bash**(sleep 600)");
        assert!(pending.is_empty());
    }

    #[test]
    fn unpaired_result_emitted_alone() {
        let mut pending = HashMap::new();
        let result_entry = line(
            r#"{"type":"user","message":{"content":[{"type":"tool_result","tool_use_id":"tu_unknown","content":"out"}]}}"#,
        );
        let events = parse_entries(&[result_entry], &mut pending);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].tool_name, "");
    }

    #[test]
    fn text_and_thinking_in_source_order() {
        let entry = line(
            r#"{"type":"assistant","message":{"content":[{"type":"thinking","thinking":"deep thought"},{"type":"text","text":"The answer is 42"}]}}"#,
        );
        let mut pending = HashMap::new();
        let events = parse_entries(&[entry], &mut pending);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, ContentKind::Thinking);
        assert_eq!(events[1].kind, ContentKind::Text);
    }

    #[test]
    fn result_content_array_joined() {
        let entry = line(
            r#"{"type":"user","message":{"content":[{"type":"tool_result","tool_use_id":"tu_arr","content":[{"type":"text","text":"line1"},{"type":"text","text":"line2"}]}]}}"#,
        );
        assert_eq!(
            entry.blocks,
            vec![Block::ToolResult {
                tool_use_id: "tu_arr".into(),
                content: "line1\nline2".into(),
                is_error: false
            }]
        );
    }

    #[test]
    fn clean_text_strips_reminder_tags() {
        assert_eq!(
            clean_text("Hello <system-reminder>secret</system-reminder> world"),
            "Hello  world"
        );
        assert_eq!(clean_text("Hello world"), "Hello world");
    }

    #[test]
    fn tool_summary_format() {
        assert_eq!(format_tool_use_summary("Read", "main.go"), "**Read**(main.go)");
        assert_eq!(format_tool_use_summary("Bash", "ls -la"), "**Bash**(ls -la)");
        assert_eq!(format_tool_use_summary("Task", ""), "**Task**()");
    }

    #[test]
    fn parse_line_is_deterministic() {
        let raw = br#"{"type":"assistant","message":{"content":[{"type":"text","text":"same"}]}}"#;
        assert_eq!(parse_line(raw).unwrap(), parse_line(raw).unwrap());
    }
}
