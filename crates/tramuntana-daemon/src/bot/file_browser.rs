//! File browser for `/c_get`: pick a file from the session's working
//! directory and receive it as a document.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::warn;

use tramuntana_core::text::truncate;

use crate::bot::Bot;
use crate::telegram::{CallbackQuery, InlineKeyboardButton, InlineKeyboardMarkup, Message, User};

const FILES_PER_PAGE: usize = 8;
const BUTTON_LABEL_CHARS: usize = 30;

/// Per-user file-browser state; `message_id` is the keyboard being edited.
#[derive(Debug, Clone, Default)]
pub(crate) struct FileBrowseState {
    pub current_path: String,
    pub page: usize,
    pub entries: Vec<BrowseEntry>,
    pub message_id: i64,
    pub chat_id: i64,
    pub thread_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BrowseEntry {
    pub name: String,
    pub is_dir: bool,
}

/// List visible entries of `path`, directories first, each group sorted.
/// Symlinks are resolved, so a link to a directory browses like one.
fn list_entries(path: &Path) -> std::io::Result<Vec<BrowseEntry>> {
    let mut dirs = Vec::new();
    let mut files = Vec::new();
    for entry in std::fs::read_dir(path)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        if entry.path().is_dir() {
            dirs.push(name);
        } else {
            files.push(name);
        }
    }
    dirs.sort();
    files.sort();

    let mut out: Vec<BrowseEntry> = dirs
        .into_iter()
        .map(|name| BrowseEntry { name, is_dir: true })
        .collect();
    out.extend(files.into_iter().map(|name| BrowseEntry { name, is_dir: false }));
    Ok(out)
}

/// Build one page of the browser. Returns the header text, the keyboard and
/// the full entry list (for the per-user state).
pub(crate) fn build_file_browser(
    path: &str,
    page: i64,
) -> (String, InlineKeyboardMarkup, Option<Vec<BrowseEntry>>) {
    let entries = match list_entries(Path::new(path)) {
        Ok(entries) => entries,
        Err(err) => {
            let keyboard = InlineKeyboardMarkup::new(vec![action_row()]);
            return (format!("Error reading {path}: {err}"), keyboard, None);
        }
    };

    let dir_count = entries.iter().filter(|e| e.is_dir).count();
    let file_count = entries.len() - dir_count;

    let total_pages = entries.len().div_ceil(FILES_PER_PAGE).max(1);
    let page = (page.max(0) as usize).min(total_pages - 1);
    let start = page * FILES_PER_PAGE;
    let end = (start + FILES_PER_PAGE).min(entries.len());

    let text = if entries.is_empty() {
        format!("{path}\n(empty directory)")
    } else {
        format!("{path}\n{dir_count} dirs, {file_count} files")
    };

    let mut rows: Vec<Vec<InlineKeyboardButton>> = Vec::new();
    for (offset, entry) in entries[start..end].iter().enumerate() {
        let index = start + offset;
        let label = if entry.is_dir {
            format!("\u{1F4C1} {}", truncate(&entry.name, BUTTON_LABEL_CHARS))
        } else {
            truncate(&entry.name, BUTTON_LABEL_CHARS)
        };
        let button = InlineKeyboardButton::callback(label, format!("get_sel:{index}"));
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
                format!("get_page:{}", page - 1),
            ));
        }
        pager.push(InlineKeyboardButton::callback(
            format!("{}/{}", page + 1, total_pages),
            "get_noop",
        ));
        if page + 1 < total_pages {
            pager.push(InlineKeyboardButton::callback(
                "Next",
                format!("get_page:{}", page + 1),
            ));
        }
        rows.push(pager);
    }

    rows.push(action_row());
    (text, InlineKeyboardMarkup::new(rows), Some(entries))
}

fn action_row() -> Vec<InlineKeyboardButton> {
    vec![
        InlineKeyboardButton::callback("..", "get_up"),
        InlineKeyboardButton::callback("Cancel", "get_cancel"),
    ]
}

impl Bot {
    /// `/c_get`: open the browser at the bound session's working directory,
    /// falling back to the home directory.
    pub(crate) async fn handle_get_command(self: &Arc<Self>, msg: &Message, user: &User) {
        let mut start = String::new();
        if let Some(window_id) = self.resolve_window(user.id, msg.thread_id())
            && let Some(ws) = self.state.lock().window_state(&window_id)
            && !ws.cwd.is_empty()
        {
            start = ws.cwd.clone();
        }
        if start.is_empty() {
            start = tramuntana_core::home::home_dir()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_else(|_| "/".to_string());
        }

        self.show_file_browser(msg.chat.id, msg.thread_id(), user.id, &start).await;
    }

    pub(crate) async fn show_file_browser(
        self: &Arc<Self>,
        chat_id: i64,
        thread_id: i64,
        user_id: i64,
        path: &str,
    ) {
        let (text, keyboard, entries) = build_file_browser(path, 0);
        let sent = match self.send_with_keyboard(chat_id, thread_id, &text, &keyboard).await {
            Ok(sent) => sent,
            Err(err) => {
                warn!("error sending file browser: {}", err);
                return;
            }
        };

        self.file_browsers.lock().expect("file browser lock").insert(
            user_id,
            FileBrowseState {
                current_path: path.to_string(),
                page: 0,
                entries: entries.unwrap_or_default(),
                message_id: sent.message_id,
                chat_id,
                thread_id,
            },
        );
    }

    pub(crate) async fn handle_file_browser_callback(self: &Arc<Self>, cq: &CallbackQuery, data: &str) {
        let user_id = cq.from.id;

        match data {
            "get_cancel" => {
                let removed = self
                    .file_browsers
                    .lock()
                    .expect("file browser lock")
                    .remove(&user_id);
                if let Some(fb) = removed {
                    self.edit_message(fb.chat_id, fb.message_id, "Cancelled.").await;
                }
            }
            "get_up" => {
                let parent = {
                    let browsers = self.file_browsers.lock().expect("file browser lock");
                    browsers.get(&user_id).and_then(|fb| {
                        Path::new(&fb.current_path).parent().map(Path::to_path_buf)
                    })
                };
                if let Some(path) = parent {
                    self.rerender_file_browser(user_id, path, 0).await;
                }
            }
            _ => {
                if let Some(page) = data.strip_prefix("get_page:") {
                    let Ok(page) = page.parse::<i64>() else {
                        return;
                    };
                    let path = {
                        let browsers = self.file_browsers.lock().expect("file browser lock");
                        browsers.get(&user_id).map(|fb| PathBuf::from(&fb.current_path))
                    };
                    if let Some(path) = path {
                        self.rerender_file_browser(user_id, path, page).await;
                    }
                } else if let Some(index) = data.strip_prefix("get_sel:") {
                    let Ok(index) = index.parse::<usize>() else {
                        return;
                    };
                    self.select_browse_entry(user_id, index).await;
                }
            }
        }
    }

    async fn rerender_file_browser(self: &Arc<Self>, user_id: i64, path: PathBuf, page: i64) {
        let (text, keyboard, entries) = build_file_browser(&path.to_string_lossy(), page);

        let target = {
            let mut browsers = self.file_browsers.lock().expect("file browser lock");
            browsers.get_mut(&user_id).map(|fb| {
                fb.current_path = path.to_string_lossy().into_owned();
                fb.page = page.max(0) as usize;
                if let Some(entries) = entries {
                    fb.entries = entries;
                }
                (fb.chat_id, fb.message_id)
            })
        };

        if let Some((chat_id, message_id)) = target {
            self.edit_message_with_keyboard(chat_id, message_id, &text, &keyboard)
                .await;
        }
    }

    /// A tapped entry either descends into a directory or uploads the file.
    async fn select_browse_entry(self: &Arc<Self>, user_id: i64, index: usize) {
        let (entry, state) = {
            let browsers = self.file_browsers.lock().expect("file browser lock");
            let Some(fb) = browsers.get(&user_id) else {
                return;
            };
            let Some(entry) = fb.entries.get(index).cloned() else {
                return;
            };
            (entry, fb.clone())
        };

        let full = PathBuf::from(&state.current_path).join(&entry.name);
        if entry.is_dir {
            self.rerender_file_browser(user_id, full, 0).await;
            return;
        }

        self.file_browsers.lock().expect("file browser lock").remove(&user_id);
        self.edit_message(
            state.chat_id,
            state.message_id,
            &format!("Sending {}...", entry.name),
        )
        .await;

        if let Err(err) = self
            .telegram
            .send_document(state.chat_id, state.thread_id, &full)
            .await
        {
            warn!("error sending document {}: {}", full.display(), err);
            self.reply(
                state.chat_id,
                state.thread_id,
                &format!("Error: failed to send {}.", entry.name),
            )
            .await;
        }
    }
}
