//! Blocking git wrappers for worktree isolation and merges.
//!
//! A merge conflict is not a failure to the caller but a branch in the
//! control flow, so it gets its own error variant carrying the conflicted
//! paths.

use std::process::Command;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GitError {
    #[error("merge conflict in {} files: {}", files.len(), files.join(", "))]
    Conflict { files: Vec<String> },

    #[error("git {command} in {dir}: {detail}")]
    Command {
        command: String,
        dir: String,
        detail: String,
    },

    #[error("git {command}: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },
}

fn run(dir: &str, args: &[&str]) -> Result<String, GitError> {
    let command = args.join(" ");
    let output = Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(args)
        .output()
        .map_err(|source| GitError::Spawn {
            command: command.clone(),
            source,
        })?;

    if !output.status.success() {
        let mut detail = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if detail.is_empty() {
            detail = String::from_utf8_lossy(&output.stdout).trim().to_string();
        }
        return Err(GitError::Command {
            command,
            dir: dir.to_string(),
            detail,
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Repository root for the given directory.
pub fn repo_root(dir: &str) -> Result<String, GitError> {
    run(dir, &["rev-parse", "--show-toplevel"]).map(|out| out.trim().to_string())
}

/// Current branch name for the given directory.
pub fn current_branch(dir: &str) -> Result<String, GitError> {
    run(dir, &["rev-parse", "--abbrev-ref", "HEAD"]).map(|out| out.trim().to_string())
}

/// Create a worktree with a new branch.
pub fn worktree_add(repo_root: &str, worktree_dir: &str, branch: &str) -> Result<(), GitError> {
    run(repo_root, &["worktree", "add", "-b", branch, worktree_dir]).map(drop)
}

/// Remove a worktree directory.
pub fn worktree_remove(repo_root: &str, worktree_dir: &str) -> Result<(), GitError> {
    run(repo_root, &["worktree", "remove", "--force", worktree_dir]).map(drop)
}

/// Delete a local branch.
pub fn delete_branch(repo_root: &str, branch: &str) -> Result<(), GitError> {
    run(repo_root, &["branch", "-D", branch]).map(drop)
}

/// Branches not yet merged into `base_branch`.
pub fn list_unmerged_branches(dir: &str, base_branch: &str) -> Result<Vec<String>, GitError> {
    let out = run(
        dir,
        &["branch", "--no-merged", base_branch, "--format=%(refname:short)"],
    )?;
    Ok(out
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

/// Squash-merge `branch` into `base_branch` and commit. Returns the commit
/// SHA on success; conflicts surface as [`GitError::Conflict`] with the
/// conflicted paths.
pub fn merge_squash(
    dir: &str,
    branch: &str,
    base_branch: &str,
    message: &str,
) -> Result<String, GitError> {
    run(dir, &["checkout", base_branch])?;

    if let Err(err) = run(dir, &["merge", "--squash", branch]) {
        return Err(conflict_or(dir, err));
    }

    if let Err(err) = run(dir, &["commit", "-m", message]) {
        return Err(conflict_or(dir, err));
    }

    rev_parse(dir, "HEAD")
}

fn conflict_or(dir: &str, err: GitError) -> GitError {
    if let GitError::Command { detail, .. } = &err
        && (detail.contains("CONFLICT") || detail.contains("Automatic merge failed"))
    {
        return GitError::Conflict {
            files: conflict_files(dir),
        };
    }
    // The commit step fails with unmerged-file errors while conflicts exist.
    if !conflict_files(dir).is_empty() {
        return GitError::Conflict {
            files: conflict_files(dir),
        };
    }
    err
}

/// Discard all working-tree changes. A squash merge leaves no MERGE_HEAD to
/// abort, so conflicts are unwound with a hard reset.
pub fn reset_hard(dir: &str) -> Result<(), GitError> {
    run(dir, &["reset", "--hard"]).map(drop)
}

fn conflict_files(dir: &str) -> Vec<String> {
    run(dir, &["diff", "--name-only", "--diff-filter=U"])
        .map(|out| {
            out.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn rev_parse(dir: &str, rev: &str) -> Result<String, GitError> {
    run(dir, &["rev-parse", rev]).map(|out| out.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_error_message_lists_files() {
        let err = GitError::Conflict {
            files: vec!["src/a.rs".into(), "src/b.rs".into()],
        };
        let text = err.to_string();
        assert!(text.contains("2 files"));
        assert!(text.contains("src/a.rs"));
    }
}
