//! `/t_pickw`: run a task in an isolated git worktree with its own forum
//! topic and Claude session.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use tramuntana_core::state::{WindowState, WorktreeInfo};

use crate::bot::Bot;
use crate::git;
use crate::telegram::{Message, User};
use crate::tmux;

/// Claude needs a moment after window creation before it accepts input.
const PROMPT_WARMUP: Duration = Duration::from_secs(2);

impl Bot {
    pub(crate) async fn handle_pickw_command(self: &Arc<Self>, msg: &Message, user: &User, args: &str) {
        let Some(task) = self.resolve_task_id(msg, user, args.trim(), "pickw").await else {
            return;
        };
        self.execute_pickw_task(msg.chat.id, msg.thread_id(), user, &task.id).await;
    }

    /// Create the worktree, a topic named after the task, and a window in
    /// the worktree directory; then deliver the task prompt.
    pub(crate) async fn execute_pickw_task(
        self: &Arc<Self>,
        chat_id: i64,
        thread_id: i64,
        user: &User,
        task_id: &str,
    ) {
        let thread = thread_id.to_string();
        let user_id = user.id.to_string();

        let Some(project) = self.state.lock().project(&thread).map(str::to_string) else {
            self.reply(chat_id, thread_id, "No project bound. Use /p_bind <name> first.")
                .await;
            return;
        };

        let repo_root = match self.repo_root_for(&user_id, &thread) {
            Ok(root) => root,
            Err(err) => {
                self.reply(chat_id, thread_id, &format!("Error: {err}")).await;
                return;
            }
        };

        let base_branch = match git::current_branch(&repo_root) {
            Ok(branch) => branch,
            Err(err) => {
                self.reply(chat_id, thread_id, &format!("Error getting branch: {err}")).await;
                return;
            }
        };

        let branch = format!("minuano/{project}-{task_id}");
        let worktree_dir = format!("{repo_root}/.minuano/worktrees/{project}-{task_id}");

        self.reply(chat_id, thread_id, &format!("Creating worktree for {task_id}...")).await;

        if let Err(err) = git::worktree_add(&repo_root, &worktree_dir, &branch) {
            self.reply(chat_id, thread_id, &format!("Error creating worktree: {err}")).await;
            return;
        }

        let topic_name = format!("{task_id} [{project}]");
        let new_thread_id = match self.telegram.create_forum_topic(chat_id, &topic_name).await {
            Ok(id) => id,
            Err(err) => {
                rollback_worktree(&repo_root, &worktree_dir, &branch);
                self.reply(chat_id, thread_id, &format!("Error creating topic: {err}")).await;
                return;
            }
        };

        let env = self.minuano_window_env(&format!("{project}-{task_id}"));
        let window_id = match tmux::new_window(
            &self.config.tmux_session_name,
            task_id,
            &worktree_dir,
            &self.config.claude_command,
            &env,
        ) {
            Ok(id) => id,
            Err(err) => {
                rollback_worktree(&repo_root, &worktree_dir, &branch);
                self.reply(chat_id, thread_id, &format!("Error creating window: {err}")).await;
                return;
            }
        };

        self.wait_for_session_map(&window_id).await;

        let new_thread = new_thread_id.to_string();
        {
            let mut state = self.state.lock();
            state.bind_thread(&user_id, &new_thread, &window_id);
            state.set_group_chat_id(&user_id, &new_thread, chat_id);
            state.bind_project(&new_thread, &project);
            if state.window_state(&window_id).is_none() {
                state.set_window_state(
                    &window_id,
                    WindowState {
                        cwd: worktree_dir.clone(),
                        ..Default::default()
                    },
                );
            }
            state.set_worktree_info(
                &new_thread,
                WorktreeInfo {
                    repo_root: repo_root.clone(),
                    worktree_dir: worktree_dir.clone(),
                    branch: branch.clone(),
                    base_branch,
                    task_id: task_id.to_string(),
                    is_merge_topic: false,
                },
            );
        }
        self.save_state();

        let Some(bridge) = &self.minuano else {
            self.reply(chat_id, thread_id, "Worktree ready but the task tracker is not configured.")
                .await;
            return;
        };
        let prompt = match bridge.prompt_single(task_id) {
            Ok(prompt) => prompt,
            Err(err) => {
                warn!("error generating prompt for {}: {}", task_id, err);
                self.reply(
                    chat_id,
                    new_thread_id,
                    &format!("Worktree ready but failed to generate prompt: {err}"),
                )
                .await;
                self.reply(
                    chat_id,
                    thread_id,
                    &format!(
                        "Worktree topic created for {task_id} (branch: {branch}). Prompt generation failed."
                    ),
                )
                .await;
                return;
            }
        };

        // Wrap the prompt so the assistant settles into the worktree first.
        let prompt = format!("Change into {worktree_dir} before doing anything else.\n\n{prompt}");

        tokio::time::sleep(PROMPT_WARMUP).await;
        if let Err(err) = self.send_prompt_to_window(&window_id, &prompt).await {
            warn!("error sending prompt to worktree session: {}", err);
            self.reply(chat_id, new_thread_id, "Worktree ready but failed to send prompt.")
                .await;
        }

        self.reply(
            chat_id,
            thread_id,
            &format!("Worktree topic created for {task_id} (branch: {branch})"),
        )
        .await;
    }

    /// Resolve the repo root for a topic's window: its working directory, or
    /// `cwd/<project>` when the session sits one level above the checkout.
    pub(crate) fn repo_root_for(&self, user_id: &str, thread_id: &str) -> Result<String, String> {
        let state = self.state.lock();
        let Some(window_id) = state.window_for_thread(user_id, thread_id) else {
            return Err("topic not bound to a session".into());
        };
        let Some(ws) = state.window_state(window_id) else {
            return Err("no CWD known for current session".into());
        };
        let cwd = ws.cwd.clone();
        if cwd.is_empty() {
            return Err("no CWD known for current session".into());
        }
        let project = state.project(thread_id).map(str::to_string);
        drop(state);

        if let Ok(root) = git::repo_root(&cwd) {
            return Ok(root);
        }
        if let Some(project) = project {
            let project_dir = format!("{cwd}/{project}");
            if let Ok(root) = git::repo_root(&project_dir) {
                return Ok(root);
            }
        }
        Err(format!("not a git repository: {cwd}"))
    }
}

fn rollback_worktree(repo_root: &str, worktree_dir: &str, branch: &str) {
    if let Err(err) = git::worktree_remove(repo_root, worktree_dir) {
        warn!("rollback: error removing worktree {}: {}", worktree_dir, err);
    }
    if let Err(err) = git::delete_branch(repo_root, branch) {
        warn!("rollback: error deleting branch {}: {}", branch, err);
    }
}
