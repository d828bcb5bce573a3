//! Inline-keyboard callback data.
//!
//! Callback payloads follow `"<prefix>_<verb>:<id>"` and must stay within
//! the platform's 64-byte cap. `noop` is the reserved sentinel for inert
//! buttons (section headers, page indicators).

/// Reserved sentinel for buttons that do nothing.
pub const NOOP: &str = "noop";

const MAX_CALLBACK_BYTES: usize = 64;

/// The routing family of a callback payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackKind {
    Approval,
    TaskPick,
    Merge,
    Window,
    Get,
    History,
    Screenshot,
    Nav,
    Menu,
    Planner,
    Noop,
    Unknown,
}

/// Classify callback data by its prefix.
pub fn classify(data: &str) -> CallbackKind {
    if data == NOOP || data == "get_noop" {
        return CallbackKind::Noop;
    }
    match data.split(['_', ':']).next().unwrap_or("") {
        "approval" => CallbackKind::Approval,
        "tpick" => CallbackKind::TaskPick,
        "merge" => CallbackKind::Merge,
        "win" => CallbackKind::Window,
        "get" => CallbackKind::Get,
        "hist" => CallbackKind::History,
        "ss" => CallbackKind::Screenshot,
        "nav" => CallbackKind::Nav,
        "menu" => CallbackKind::Menu,
        "planner" => CallbackKind::Planner,
        _ => CallbackKind::Unknown,
    }
}

fn clamp(data: String) -> String {
    if data.len() <= MAX_CALLBACK_BYTES {
        return data;
    }
    let mut cut = MAX_CALLBACK_BYTES;
    while !data.is_char_boundary(cut) {
        cut -= 1;
    }
    data[..cut].to_string()
}

/// History pagination: `hist_<page>:<windowID>`.
pub fn format_hist(page: usize, window_id: &str) -> String {
    clamp(format!("hist_{page}:{window_id}"))
}

/// Parse `hist_<page>:<windowID>`.
pub fn parse_hist(data: &str) -> Option<(usize, &str)> {
    let rest = data.strip_prefix("hist_")?;
    let (page, window_id) = rest.split_once(':')?;
    Some((page.parse().ok()?, window_id))
}

/// Screenshot key relay: `ss_<action>:<windowID>`.
pub fn format_ss(action: &str, window_id: &str) -> String {
    clamp(format!("ss_{action}:{window_id}"))
}

/// Parse `ss_<action>:<windowID>`.
pub fn parse_ss(data: &str) -> Option<(&str, &str)> {
    let rest = data.strip_prefix("ss_")?;
    rest.split_once(':')
}

/// Generic `<prefix>_<verb>:<id>` splitter for single-id payloads
/// (`approval_approve:<task>`, `tpick_pick:<task>`, `merge_br:<branch>`,
/// `planner_reopen:<topic>`...).
pub fn parse_verb_id(data: &str) -> Option<(&str, &str)> {
    data.split_once(':')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_prefixes() {
        assert_eq!(classify("approval_approve:t1"), CallbackKind::Approval);
        assert_eq!(classify("tpick_pick:t1"), CallbackKind::TaskPick);
        assert_eq!(classify("merge_br:feature-x"), CallbackKind::Merge);
        assert_eq!(classify("win_bind:0"), CallbackKind::Window);
        assert_eq!(classify("get_sel:3"), CallbackKind::Get);
        assert_eq!(classify("hist_0:@1"), CallbackKind::History);
        assert_eq!(classify("ss_up:@1"), CallbackKind::Screenshot);
        assert_eq!(classify("nav_enter"), CallbackKind::Nav);
        assert_eq!(classify("menu_t_pick"), CallbackKind::Menu);
        assert_eq!(classify("planner_reopen:42"), CallbackKind::Planner);
        assert_eq!(classify("noop"), CallbackKind::Noop);
        assert_eq!(classify("get_noop"), CallbackKind::Noop);
        assert_eq!(classify("bogus_x:1"), CallbackKind::Unknown);
    }

    #[test]
    fn hist_round_trip() {
        assert_eq!(format_hist(3, "@1"), "hist_3:@1");
        assert_eq!(parse_hist("hist_0:@1"), Some((0, "@1")));
        assert_eq!(parse_hist("hist_5:@10"), Some((5, "@10")));
        assert_eq!(parse_hist("hist_nope:@1"), None);
        assert_eq!(parse_hist("ss_up:@1"), None);
        assert_eq!(parse_hist("hist_0"), None);
    }

    #[test]
    fn ss_round_trip() {
        assert_eq!(format_ss("up", "@1"), "ss_up:@1");
        assert_eq!(parse_ss("ss_up:@1"), Some(("up", "@1")));
        assert_eq!(parse_ss("ss_refresh:@10"), Some(("refresh", "@10")));
        assert_eq!(parse_ss("ss_nocolon"), None);
        assert_eq!(parse_ss("nav_up:@1"), None);
        assert_eq!(parse_ss(""), None);
    }

    #[test]
    fn formatted_data_fits_platform_cap() {
        let long_window = format!("@{}", "x".repeat(100));
        assert!(format_ss("refresh", &long_window).len() <= MAX_CALLBACK_BYTES);
        assert!(format_hist(99, &long_window).len() <= MAX_CALLBACK_BYTES);
    }

    #[test]
    fn verb_id_split() {
        assert_eq!(
            parse_verb_id("approval_approve:task-1"),
            Some(("approval_approve", "task-1"))
        );
        assert_eq!(parse_verb_id("merge_cancel"), None);
    }
}
