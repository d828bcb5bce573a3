//! Directory browser: lets the user pick a directory to spawn a new Claude
//! window in when no unbound window exists. Shares the `win_` callback
//! prefix with the window picker.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::warn;

use tramuntana_core::text::truncate;

use crate::bot::{Bot, synthetic_message};
use crate::telegram::{CallbackQuery, InlineKeyboardButton, InlineKeyboardMarkup};
use crate::tmux::Window;

const DIRS_PER_PAGE: usize = 8;
const BUTTON_LABEL_CHARS: usize = 30;

/// Per-user picker/browser state. One struct serves both the window picker
/// (windows set) and the directory browser (current_path + entries set);
/// `message_id` is the inline keyboard being edited in place.
#[derive(Debug, Clone, Default)]
pub(crate) struct BrowseState {
    pub current_path: String,
    pub page: usize,
    pub windows: Vec<Window>,
    pub entries: Vec<String>,
    pub pending_text: String,
    pub message_id: i64,
    pub chat_id: i64,
    pub thread_id: i64,
}

/// List the visible subdirectories of `path`, sorted by name.
fn list_dirs(path: &Path) -> std::io::Result<Vec<String>> {
    let mut dirs = Vec::new();
    for entry in std::fs::read_dir(path)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        if entry.path().is_dir() {
            dirs.push(name);
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// Build the browser text and keyboard for one page of `dirs`.
fn build_directory_browser(
    path: &str,
    dirs: &[String],
    page: usize,
) -> (String, InlineKeyboardMarkup) {
    let total_pages = dirs.len().div_ceil(DIRS_PER_PAGE).max(1);
    let page = page.min(total_pages - 1);
    let start = page * DIRS_PER_PAGE;
    let end = (start + DIRS_PER_PAGE).min(dirs.len());

    let text = format!("Pick a directory for the new session:\n{path}");

    let mut rows: Vec<Vec<InlineKeyboardButton>> = Vec::new();
    for (offset, name) in dirs[start..end].iter().enumerate() {
        let index = start + offset;
        let button = InlineKeyboardButton::callback(
            format!("\u{1F4C1} {}", truncate(name, BUTTON_LABEL_CHARS)),
            format!("win_dir:{index}"),
        );
        if offset % 2 == 0 {
            rows.push(vec![button]);
        } else if let Some(row) = rows.last_mut() {
            row.push(button);
        }
    }

    if total_pages > 1 {
        let mut pager = Vec::new();
        if page > 0 {
            pager.push(InlineKeyboardButton::callback(
                "Prev",
                format!("win_pg:{}", page - 1),
            ));
        }
        pager.push(InlineKeyboardButton::callback(
            format!("{}/{}", page + 1, total_pages),
            "noop",
        ));
        if page + 1 < total_pages {
            pager.push(InlineKeyboardButton::callback(
                "Next",
                format!("win_pg:{}", page + 1),
            ));
        }
        rows.push(pager);
    }

    rows.push(vec![
        InlineKeyboardButton::callback("Use this dir", "win_sel"),
        InlineKeyboardButton::callback("..", "win_up"),
        InlineKeyboardButton::callback("Cancel", "win_cancel"),
    ]);

    (text, InlineKeyboardMarkup::new(rows))
}

impl Bot {
    /// Open the directory browser at the user's home directory.
    pub(crate) async fn show_directory_browser(
        self: &Arc<Self>,
        chat_id: i64,
        thread_id: i64,
        user_id: i64,
        pending_text: &str,
    ) {
        let start = tramuntana_core::home::home_dir()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "/".to_string());

        let dirs = match list_dirs(Path::new(&start)) {
            Ok(dirs) => dirs,
            Err(err) => {
                warn!("error listing {}: {}", start, err);
                self.reply(chat_id, thread_id, "Error: cannot list directories.").await;
                return;
            }
        };

        let (text, keyboard) = build_directory_browser(&start, &dirs, 0);
        let sent = match self.send_with_keyboard(chat_id, thread_id, &text, &keyboard).await {
            Ok(sent) => sent,
            Err(err) => {
                warn!("error sending directory browser: {}", err);
                return;
            }
        };

        self.browse_states.lock().expect("browse lock").insert(
            user_id,
            BrowseState {
                current_path: start,
                page: 0,
                windows: Vec::new(),
                entries: dirs,
                pending_text: pending_text.to_string(),
                message_id: sent.message_id,
                chat_id,
                thread_id,
            },
        );
    }

    /// Directory-browser share of the `win_` callbacks: `win_dir:<i>`,
    /// `win_up`, `win_pg:<n>` and `win_sel`.
    pub(crate) async fn handle_directory_callback(self: &Arc<Self>, cq: &CallbackQuery, data: &str) {
        let user_id = cq.from.id;

        if let Some(index) = data.strip_prefix("win_dir:") {
            let Ok(index) = index.parse::<usize>() else {
                return;
            };
            let next = {
                let states = self.browse_states.lock().expect("browse lock");
                states.get(&user_id).and_then(|bs| {
                    bs.entries
                        .get(index)
                        .map(|name| PathBuf::from(&bs.current_path).join(name))
                })
            };
            if let Some(path) = next {
                self.rerender_directory(user_id, path).await;
            }
        } else if data == "win_up" {
            let parent = {
                let states = self.browse_states.lock().expect("browse lock");
                states.get(&user_id).and_then(|bs| {
                    Path::new(&bs.current_path).parent().map(Path::to_path_buf)
                })
            };
            if let Some(path) = parent {
                self.rerender_directory(user_id, path).await;
            }
        } else if let Some(page) = data.strip_prefix("win_pg:") {
            let Ok(page) = page.parse::<usize>() else {
                return;
            };
            let current = {
                let mut states = self.browse_states.lock().expect("browse lock");
                states.get_mut(&user_id).map(|bs| {
                    bs.page = page;
                    (bs.current_path.clone(), bs.entries.clone(), bs.message_id, bs.chat_id)
                })
            };
            if let Some((path, dirs, message_id, chat_id)) = current {
                let (text, keyboard) = build_directory_browser(&path, &dirs, page);
                self.edit_message_with_keyboard(chat_id, message_id, &text, &keyboard)
                    .await;
            }
        } else if data == "win_sel" {
            self.spawn_window_for_selection(cq).await;
        }
    }

    async fn rerender_directory(self: &Arc<Self>, user_id: i64, path: PathBuf) {
        let dirs = match list_dirs(&path) {
            Ok(dirs) => dirs,
            Err(err) => {
                warn!("error listing {}: {}", path.display(), err);
                return;
            }
        };

        let target = {
            let mut states = self.browse_states.lock().expect("browse lock");
            states.get_mut(&user_id).map(|bs| {
                bs.current_path = path.to_string_lossy().into_owned();
                bs.entries = dirs.clone();
                bs.page = 0;
                (bs.current_path.clone(), bs.message_id, bs.chat_id)
            })
        };

        if let Some((path, message_id, chat_id)) = target {
            let (text, keyboard) = build_directory_browser(&path, &dirs, 0);
            self.edit_message_with_keyboard(chat_id, message_id, &text, &keyboard)
                .await;
        }
    }

    /// The user picked the current directory: spawn a window there, bind the
    /// topic and replay the pending text.
    async fn spawn_window_for_selection(self: &Arc<Self>, cq: &CallbackQuery) {
        let Some(bs) = self.browse_states.lock().expect("browse lock").remove(&cq.from.id) else {
            return;
        };
        let Some((_msg, user)) = synthetic_message(cq) else {
            return;
        };

        self.edit_message(
            bs.chat_id,
            bs.message_id,
            &format!("Starting session in {}...", bs.current_path),
        )
        .await;

        match self
            .create_window_for_dir(&bs.current_path, user.id, bs.chat_id, bs.thread_id)
            .await
        {
            Ok(created) => {
                self.reply(
                    bs.chat_id,
                    bs.thread_id,
                    &format!("Session started ({}).", created.window_id),
                )
                .await;

                if !bs.pending_text.is_empty()
                    && let Err(err) = crate::tmux::send_keys_with_delay(
                        &self.config.tmux_session_name,
                        &created.window_id,
                        &bs.pending_text,
                        crate::bot::handlers::KEY_DELAY_MS,
                    )
                    .await
                {
                    warn!("error replaying pending text: {}", err);
                }
            }
            Err(err) => {
                self.reply(bs.chat_id, bs.thread_id, &format!("Error: {err}")).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn lists_sorted_visible_dirs_only() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("zeta")).unwrap();
        std::fs::create_dir(dir.path().join("alpha")).unwrap();
        std::fs::create_dir(dir.path().join(".hidden")).unwrap();
        std::fs::write(dir.path().join("file.txt"), "x").unwrap();

        let dirs = list_dirs(dir.path()).unwrap();
        assert_eq!(dirs, vec!["alpha".to_string(), "zeta".to_string()]);
    }

    #[test]
    fn browser_has_action_row_and_pagination() {
        let dirs: Vec<String> = (0..20).map(|i| format!("dir{i:02}")).collect();
        let (text, kb) = build_directory_browser("/home/user", &dirs, 0);

        assert!(text.contains("/home/user"));

        // Pager row exists and advertises the next page.
        let flat: Vec<&str> = kb
            .inline_keyboard
            .iter()
            .flatten()
            .map(|b| b.callback_data.as_str())
            .collect();
        assert!(flat.contains(&"win_pg:1"));
        assert!(flat.contains(&"win_sel"));
        assert!(flat.contains(&"win_up"));
        assert!(flat.contains(&"win_cancel"));

        // Page indexes stay within the entry list.
        let (_, kb2) = build_directory_browser("/home/user", &dirs, 999);
        let flat2: Vec<&str> = kb2
            .inline_keyboard
            .iter()
            .flatten()
            .map(|b| b.callback_data.as_str())
            .collect();
        assert!(flat2.contains(&"win_pg:1")); // clamped to the last page, pager points back
    }

    #[test]
    fn no_pager_for_single_page() {
        let dirs = vec!["one".to_string(), "two".to_string()];
        let (_, kb) = build_directory_browser("/tmp", &dirs, 0);
        let flat: Vec<&str> = kb
            .inline_keyboard
            .iter()
            .flatten()
            .map(|b| b.callback_data.as_str())
            .collect();
        assert!(!flat.iter().any(|d| d.starts_with("win_pg:")));
    }
}
