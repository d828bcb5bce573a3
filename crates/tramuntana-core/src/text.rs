//! Text shaping helpers shared by the queue and the keyboard builders.

/// Chat platform per-message cap, with margin.
pub const MESSAGE_LIMIT: usize = 3800;

/// Shorten a string to at most `max_len` characters, appending `...` when
/// truncated. Counts characters, not bytes, so multi-byte names stay intact.
pub fn truncate(s: &str, max_len: usize) -> String {
    let chars: Vec<char> = s.chars().collect();
    if chars.len() <= max_len {
        return s.to_string();
    }
    let keep = max_len.saturating_sub(3);
    let mut out: String = chars[..keep].iter().collect();
    out.push_str("...");
    out
}

/// Take the first line of `text`, character-truncated to `max_len` with a
/// `...` suffix when the line is longer.
pub fn first_line(text: &str, max_len: usize) -> String {
    let line = match text.find('\n') {
        Some(idx) => &text[..idx],
        None => text,
    };
    let chars: Vec<char> = line.chars().collect();
    if chars.len() > max_len {
        let mut out: String = chars[..max_len].iter().collect();
        out.push_str("...");
        out
    } else {
        line.to_string()
    }
}

/// Truncate long output at the tail, keeping the most recent `max_len` bytes
/// of character-aligned text and prefixing `... `.
pub fn truncate_tail(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut start = s.len() - max_len;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    format!("... {}", &s[start..])
}

/// Split a message body into chunks of at most `max_len` bytes, breaking at
/// newline boundaries when one exists inside the window.
pub fn chunk_message(s: &str, max_len: usize) -> Vec<String> {
    if s.len() <= max_len {
        return vec![s.to_string()];
    }

    let mut chunks = Vec::new();
    let mut rest = s;
    while rest.len() > max_len {
        let mut cut = max_len;
        while !rest.is_char_boundary(cut) {
            cut -= 1;
        }
        // Prefer the last newline inside the window.
        if let Some(nl) = rest[..cut].rfind('\n')
            && nl > 0
        {
            cut = nl;
        }
        chunks.push(rest[..cut].to_string());
        rest = rest[cut..].trim_start_matches('\n');
    }
    if !rest.is_empty() {
        chunks.push(rest.to_string());
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_short_passthrough() {
        assert_eq!(truncate("short", 10), "short");
    }

    #[test]
    fn truncate_adds_ellipsis() {
        assert_eq!(truncate("very-long-project-name", 10), "very-lo...");
    }

    #[test]
    fn first_line_cases() {
        assert_eq!(first_line("short", 10), "short");
        assert_eq!(first_line("this is a longer string", 10), "this is a ...");
        assert_eq!(first_line("line1\nline2", 100), "line1");
        assert_eq!(first_line("", 10), "");
    }

    #[test]
    fn tail_truncation() {
        let long = "x".repeat(4000);
        let got = truncate_tail(&long, 3800);
        assert!(got.starts_with("... "));
        assert_eq!(got.len(), 3804);

        assert_eq!(truncate_tail("short", 3800), "short");
    }

    #[test]
    fn chunking_respects_limit_and_newlines() {
        let body = (0..100)
            .map(|i| format!("line number {i} with some padding text"))
            .collect::<Vec<_>>()
            .join("\n");
        let chunks = chunk_message(&body, 500);

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.len() <= 500, "chunk over limit: {}", chunk.len());
            // Newline-aligned chunks never split a line.
            assert!(!chunk.starts_with('\n'));
        }
        assert_eq!(chunks.join("\n"), body);
    }

    #[test]
    fn chunking_handles_no_newlines() {
        let body = "x".repeat(1200);
        let chunks = chunk_message(&body, 500);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks.concat(), body);
    }

    #[test]
    fn chunking_short_body_is_single() {
        assert_eq!(chunk_message("hello", 3800), vec!["hello".to_string()]);
    }
}
