//! `/t_merge`: squash-merge a branch, spawning a conflict-resolution topic
//! when the merge cannot complete cleanly.

use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use tracing::warn;

use tramuntana_core::state::WorktreeInfo;
use tramuntana_core::text::truncate;

use crate::bot::{Bot, synthetic_message};
use crate::git::{self, GitError};
use crate::telegram::{CallbackQuery, InlineKeyboardButton, InlineKeyboardMarkup, Message, User};

const PROMPT_WARMUP: Duration = Duration::from_secs(2);

impl Bot {
    /// `/t_merge [branch]` — branch auto-detected from the topic's worktree
    /// binding; otherwise a picker of unmerged branches is offered.
    pub(crate) async fn handle_merge_command(self: &Arc<Self>, msg: &Message, user: &User, args: &str) {
        let mut branch = args.trim().to_string();

        if branch.is_empty() {
            let thread = msg.thread_id().to_string();
            if let Some(info) = self.state.lock().worktree_info(&thread)
                && !info.branch.is_empty()
            {
                branch = info.branch.clone();
            }
        }

        if branch.is_empty() {
            self.show_merge_branch_picker(msg, user).await;
            return;
        }

        self.execute_merge(msg, user, &branch).await;
    }

    /// Pending-input continuation: resolve partial branch names against the
    /// unmerged list (case-insensitive regex).
    pub(crate) async fn execute_merge_with_branch(self: &Arc<Self>, msg: &Message, user: &User, text: &str) {
        let input = text.trim();
        if input.is_empty() {
            self.reply(msg.chat.id, msg.thread_id(), "Empty branch name.").await;
            return;
        }

        let Some(branch) = self.resolve_branch_name(msg, user, input).await else {
            return;
        };
        self.execute_merge(msg, user, &branch).await;
    }

    async fn resolve_branch_name(
        self: &Arc<Self>,
        msg: &Message,
        user: &User,
        input: &str,
    ) -> Option<String> {
        let chat_id = msg.chat.id;
        let thread_id = msg.thread_id();

        let repo_root = match self.repo_root_for(&user.id.to_string(), &thread_id.to_string()) {
            Ok(root) => root,
            Err(err) => {
                self.reply(chat_id, thread_id, &format!("Error: {err}")).await;
                return None;
            }
        };
        let base_branch = match git::current_branch(&repo_root) {
            Ok(branch) => branch,
            Err(err) => {
                self.reply(chat_id, thread_id, &format!("Error: {err}")).await;
                return None;
            }
        };
        let Ok(branches) = git::list_unmerged_branches(&repo_root, &base_branch) else {
            // Cannot enumerate; take the input literally.
            return Some(input.to_string());
        };

        if branches.iter().any(|b| b == input) {
            return Some(input.to_string());
        }

        let re = Regex::new(&format!("(?i){input}"))
            .unwrap_or_else(|_| Regex::new(&format!("(?i){}", regex::escape(input))).unwrap());
        let matches: Vec<String> = branches.into_iter().filter(|b| re.is_match(b)).collect();

        match matches.len() {
            0 => {
                self.reply(chat_id, thread_id, &format!("No unmerged branch matching '{input}'."))
                    .await;
                None
            }
            1 => Some(matches.into_iter().next().unwrap()),
            _ => {
                self.show_branch_picker(msg, &matches).await;
                None
            }
        }
    }

    async fn show_merge_branch_picker(self: &Arc<Self>, msg: &Message, user: &User) {
        let chat_id = msg.chat.id;
        let thread_id = msg.thread_id();

        let branches = self
            .repo_root_for(&user.id.to_string(), &thread_id.to_string())
            .ok()
            .and_then(|root| {
                let base = git::current_branch(&root).ok()?;
                git::list_unmerged_branches(&root, &base).ok()
            })
            .unwrap_or_default();

        if branches.is_empty() {
            self.reply(chat_id, thread_id, "No unmerged branches found. Send a branch name:")
                .await;
            self.set_pending_input(user.id, "t_merge", chat_id, thread_id);
            return;
        }

        self.show_branch_picker(msg, &branches).await;
    }

    async fn show_branch_picker(self: &Arc<Self>, msg: &Message, branches: &[String]) {
        let mut rows: Vec<Vec<InlineKeyboardButton>> = branches
            .iter()
            .map(|branch| {
                vec![InlineKeyboardButton::callback(
                    truncate(branch, 45),
                    format!("merge_br:{branch}"),
                )]
            })
            .collect();
        rows.push(vec![InlineKeyboardButton::callback("Cancel", "merge_cancel")]);

        let keyboard = InlineKeyboardMarkup::new(rows);
        if let Err(err) = self
            .send_with_keyboard(msg.chat.id, msg.thread_id(), "Select branch to merge:", &keyboard)
            .await
        {
            warn!("error sending branch picker: {}", err);
        }
    }

    pub(crate) async fn handle_merge_callback(self: &Arc<Self>, cq: &CallbackQuery, data: &str) {
        if data == "merge_cancel" {
            if let Some(message) = &cq.message {
                self.edit_message(message.chat.id, message.message_id, "Merge cancelled.").await;
            }
            return;
        }

        if let Some(branch) = data.strip_prefix("merge_br:")
            && let Some((msg, user)) = synthetic_message(cq)
        {
            self.execute_merge(&msg, &user, branch).await;
        }
    }

    /// Phase 1: squash merge. Phase 2 on conflict: reset, open a merge topic
    /// with a session in the repo root, and instruct the assistant.
    pub(crate) async fn execute_merge(self: &Arc<Self>, msg: &Message, user: &User, branch: &str) {
        let chat_id = msg.chat.id;
        let thread_id = msg.thread_id();

        let repo_root = match self.repo_root_for(&user.id.to_string(), &thread_id.to_string()) {
            Ok(root) => root,
            Err(err) => {
                self.reply(chat_id, thread_id, &format!("Error: {err}")).await;
                return;
            }
        };
        let base_branch = match git::current_branch(&repo_root) {
            Ok(b) => b,
            Err(err) => {
                self.reply(chat_id, thread_id, &format!("Error getting current branch: {err}"))
                    .await;
                return;
            }
        };

        self.reply(
            chat_id,
            thread_id,
            &format!("Squash-merging {branch} into {base_branch}..."),
        )
        .await;

        let message = format!(
            "{}\n\nSquash-merged from branch {branch}",
            branch_title(branch)
        );
        let conflict_files = match git::merge_squash(&repo_root, branch, &base_branch, &message) {
            Ok(sha) => {
                let short = &sha[..sha.len().min(8)];
                self.reply(
                    chat_id,
                    thread_id,
                    &format!("Merged {branch} into {base_branch} ({short})"),
                )
                .await;
                self.cleanup_worktree_for_branch(branch);
                return;
            }
            Err(GitError::Conflict { files }) => files,
            Err(err) => {
                self.reply(chat_id, thread_id, &format!("Merge failed: {err}")).await;
                return;
            }
        };

        // Squash merges leave no MERGE_HEAD to abort; unwind with a reset.
        if let Err(err) = git::reset_hard(&repo_root) {
            warn!("error resetting after conflict in {}: {}", repo_root, err);
        }

        self.reply(
            chat_id,
            thread_id,
            &format!("Conflict in {} files. Creating merge topic...", conflict_files.len()),
        )
        .await;

        let topic_name = format!("Merge: {branch}");
        let new_thread_id = match self.telegram.create_forum_topic(chat_id, &topic_name).await {
            Ok(id) => id,
            Err(err) => {
                self.reply(chat_id, thread_id, &format!("Error creating merge topic: {err}"))
                    .await;
                return;
            }
        };

        let created = match self
            .create_window_for_dir(&repo_root, user.id, chat_id, new_thread_id)
            .await
        {
            Ok(created) => created,
            Err(err) => {
                self.reply(chat_id, thread_id, &format!("Error creating merge session: {err}"))
                    .await;
                return;
            }
        };

        self.state.lock().set_worktree_info(
            &new_thread_id.to_string(),
            WorktreeInfo {
                repo_root: repo_root.clone(),
                worktree_dir: String::new(),
                branch: branch.to_string(),
                base_branch: base_branch.clone(),
                task_id: String::new(),
                is_merge_topic: true,
            },
        );
        self.save_state();

        let prompt = merge_conflict_prompt(branch, &base_branch, &conflict_files);

        tokio::time::sleep(PROMPT_WARMUP).await;
        if let Err(err) = self.send_prompt_to_window(&created.window_id, &prompt).await {
            warn!("error sending merge prompt: {}", err);
            self.reply(chat_id, new_thread_id, "Session ready but failed to send merge prompt.")
                .await;
        }

        self.reply(chat_id, thread_id, "Merge topic created. Claude is resolving conflicts.")
            .await;
    }

    /// After a clean merge, the branch's worktree (if any topic owns one) is
    /// no longer needed.
    fn cleanup_worktree_for_branch(&self, branch: &str) {
        let thread_ids = self.state.lock().all_worktree_thread_ids();
        for thread_id in thread_ids {
            let Some(info) = self.state.lock().worktree_info(&thread_id).cloned() else {
                continue;
            };
            if info.branch != branch {
                continue;
            }

            if !info.worktree_dir.is_empty()
                && let Err(err) = git::worktree_remove(&info.repo_root, &info.worktree_dir)
            {
                warn!("error removing worktree {}: {}", info.worktree_dir, err);
            }
            if let Err(err) = git::delete_branch(&info.repo_root, &info.branch) {
                warn!("error deleting branch {}: {}", info.branch, err);
            }
            self.state.lock().remove_worktree_info(&thread_id);
            self.save_state();
            tracing::info!("cleaned up worktree for branch {} (topic {})", branch, thread_id);
            break;
        }
    }
}

/// Human title from a branch name: `minuano/game-fix-123` → `game-fix-123`.
fn branch_title(branch: &str) -> &str {
    branch.rsplit('/').next().unwrap_or(branch)
}

fn merge_conflict_prompt(branch: &str, base_branch: &str, files: &[String]) -> String {
    format!(
        "Merge branch {branch} into {base_branch}.\n\n\
         1. Run: git merge --squash {branch}\n\
         2. Resolve the conflicts in these files:\n  - {}\n\
         3. Read both sides of each conflict and understand the intent of each change.\n\
         4. Resolve intelligently — don't just pick one side.\n\
         5. Run the test suite to verify.\n\
         6. If tests pass, commit the squash merge. If not, fix and re-test.\n\
         7. When done, say \"Merge complete\" so I know you're finished.",
        files.join("\n  - ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branch_title_strips_namespace() {
        assert_eq!(branch_title("minuano/tramuntana-fix-bug-123"), "tramuntana-fix-bug-123");
        assert_eq!(branch_title("feature-x"), "feature-x");
    }

    #[test]
    fn conflict_prompt_lists_files() {
        let prompt = merge_conflict_prompt(
            "feature-x",
            "main",
            &["src/a.rs".to_string(), "src/b.rs".to_string()],
        );
        assert!(prompt.contains("git merge --squash feature-x"));
        assert!(prompt.contains("  - src/a.rs"));
        assert!(prompt.contains("  - src/b.rs"));
        assert!(prompt.contains("Merge complete"));
    }
}
