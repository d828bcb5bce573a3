//! Pane-capture chrome handling.
//!
//! Claude Code draws a footer at the bottom of the pane: a horizontal
//! separator, the input box and a status bar, with an animated spinner line
//! just above the separator while it works. These helpers strip that chrome
//! and pull out the spinner status text.

/// Spinner runes used by the status line.
const SPINNER_CHARS: &str = "·✻✽✶✳✢";

/// Minimum run of box-drawing characters that counts as the footer separator.
const SEPARATOR_MIN_WIDTH: usize = 20;

/// How many lines from the bottom the separator is searched in.
const SEPARATOR_SEARCH_WINDOW: usize = 10;

/// How many lines above the separator may hold the spinner.
const STATUS_SEARCH_WINDOW: usize = 3;

/// Remove the footer chrome from captured pane text, returning the content
/// above the separator. Without a separator the assistant has not drawn its
/// UI yet and the capture is returned untouched.
pub fn strip_pane_chrome(pane_text: &str) -> String {
    let lines: Vec<&str> = pane_text.split('\n').collect();
    match find_chrome_separator(&lines) {
        Some(idx) => lines[..idx].join("\n"),
        None => pane_text.to_string(),
    }
}

/// Detect the spinner status from captured pane text. Returns the trimmed
/// text after the spinner rune, or `None` when the assistant is idle.
pub fn extract_status_line(pane_text: &str) -> Option<String> {
    let lines: Vec<&str> = pane_text.split('\n').collect();
    let sep_idx = find_chrome_separator(&lines)?;

    let search_start = sep_idx.saturating_sub(STATUS_SEARCH_WINDOW);
    for i in (search_start..sep_idx).rev() {
        let line = lines[i].trim();
        if has_spinner_char(line) {
            let status = extract_after_spinner(line);
            if !status.is_empty() {
                return Some(status);
            }
        }
    }
    None
}

fn find_chrome_separator(lines: &[&str]) -> Option<usize> {
    let start = lines.len().saturating_sub(SEPARATOR_SEARCH_WINDOW);
    (start..lines.len()).rev().find(|&i| is_chrome_separator(lines[i]))
}

fn is_chrome_separator(line: &str) -> bool {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return false;
    }
    let dash_count = trimmed.chars().filter(|&c| c == '─' || c == '━').count();
    dash_count >= SEPARATOR_MIN_WIDTH
}

fn has_spinner_char(line: &str) -> bool {
    line.chars().any(|c| SPINNER_CHARS.contains(c))
}

fn extract_after_spinner(line: &str) -> String {
    for (i, c) in line.char_indices() {
        if SPINNER_CHARS.contains(c) {
            return line[i + c.len_utf8()..].trim().to_string();
        }
    }
    String::new()
}

/// Replace long separator lines with a short stub for chat display. The
/// chrome separator itself is left intact so stripping still finds the
/// footer boundary after shortening.
pub fn shorten_separators(text: &str) -> String {
    let lines: Vec<&str> = text.split('\n').collect();
    let chrome_idx = find_chrome_separator(&lines);

    lines
        .iter()
        .enumerate()
        .map(|(i, &line)| {
            if Some(i) != chrome_idx && is_chrome_separator(line) {
                "─────"
            } else {
                line
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Extract the output of a `!` shell command from a pane capture.
///
/// Looks for the last echoed command line and returns the trimmed text
/// between it and the chrome; empty when the command has not echoed yet.
pub fn extract_bash_output(pane_text: &str, command: &str) -> String {
    let body = strip_pane_chrome(pane_text);
    let lines: Vec<&str> = body.split('\n').collect();

    let cmd = command.trim();
    if cmd.is_empty() {
        return String::new();
    }

    let echo_idx = lines.iter().rposition(|line| line.trim_end().ends_with(cmd));
    match echo_idx {
        Some(idx) => lines[idx + 1..].join("\n").trim().to_string(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sep() -> String {
        "─".repeat(40)
    }

    #[test]
    fn strip_removes_chrome() {
        let pane = format!(
            "Some output line 1\nSome output line 2\nSome output line 3\n{}\n> Enter a message...\n",
            sep()
        );
        let got = strip_pane_chrome(&pane);
        assert!(!got.contains("Enter a message"));
        assert!(got.contains("Some output line 3"));
    }

    #[test]
    fn strip_without_separator_is_identity() {
        let pane = "line1\nline2\nline3";
        assert_eq!(strip_pane_chrome(pane), pane);
    }

    #[test]
    fn status_with_spinner() {
        let pane = format!("Some content\n\n✻ Reading file.go\n{}\n> prompt", sep());
        assert_eq!(extract_status_line(&pane).as_deref(), Some("Reading file.go"));
    }

    #[test]
    fn status_all_spinner_chars() {
        for spinner in SPINNER_CHARS.chars() {
            let pane = format!("content\n{spinner} Working...\n{}\n> prompt", sep());
            assert_eq!(
                extract_status_line(&pane).as_deref(),
                Some("Working..."),
                "spinner {spinner}"
            );
        }
    }

    #[test]
    fn status_absent_without_spinner() {
        let pane = format!("Some content\nNo spinner here\n{}\n> prompt", sep());
        assert!(extract_status_line(&pane).is_none());
    }

    #[test]
    fn status_absent_without_separator() {
        assert!(extract_status_line("✻ Working...\nno separator").is_none());
    }

    #[test]
    fn separator_detection() {
        assert!(is_chrome_separator(&"─".repeat(40)));
        assert!(is_chrome_separator(&"─".repeat(20)));
        assert!(!is_chrome_separator(&"─".repeat(19)));
        assert!(!is_chrome_separator("some text"));
        assert!(!is_chrome_separator(""));
        assert!(is_chrome_separator(&"━".repeat(25)));
        assert!(is_chrome_separator(&format!("  {}  ", "─".repeat(25))));
    }

    #[test]
    fn after_spinner_extraction() {
        assert_eq!(extract_after_spinner("✻ Working on task"), "Working on task");
        assert_eq!(extract_after_spinner("· Loading files"), "Loading files");
        assert_eq!(extract_after_spinner("✽   Multiple spaces"), "Multiple spaces");
        assert_eq!(extract_after_spinner("No spinner"), "");
    }

    #[test]
    fn shorten_long_separators_in_content() {
        // A separator in the content plus the real chrome separator: only the
        // content one is shortened.
        let input = format!("line1\n{}\nline2\n{}\n> prompt", sep(), sep());
        let got = shorten_separators(&input);
        assert!(got.contains("─────"));
        assert_eq!(got.matches(&sep()).count(), 1);
    }

    #[test]
    fn shorten_then_strip_matches_strip() {
        let pane = format!("output line\nmore output\n{}\n> prompt", sep());
        assert_eq!(
            strip_pane_chrome(&shorten_separators(&pane)),
            strip_pane_chrome(&pane)
        );
    }

    #[test]
    fn bash_output_after_echo() {
        let pane = format!("$ ls -la\nfile1\nfile2\n{}\n> prompt", sep());
        assert_eq!(extract_bash_output(&pane, "ls -la"), "file1\nfile2");
    }

    #[test]
    fn bash_output_missing_echo() {
        let pane = format!("unrelated\n{}\n> prompt", sep());
        assert_eq!(extract_bash_output(&pane, "ls -la"), "");
    }
}
