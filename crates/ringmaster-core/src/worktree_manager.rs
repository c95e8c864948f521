//! Per-worker persistent git worktree isolation (C4).
//!
//! Each worker owns one long-lived worktree under
//! `<repo>/.worktrees/worker-<sanitized-worker-id>/`. Unlike a one-shot
//! per-task worktree, this is reused across every task the worker runs:
//! each new attempt hard-resets it and rebases onto a fresh branch cut from
//! the current base reference, rather than allocating a brand-new working
//! directory per task.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::git_read_adapter::{default_read_adapter, GitReadAdapter};

#[derive(Debug, Error)]
pub enum WorktreeManagerError {
    #[error("git command failed: {0}")]
    GitCommand(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("worktree not found for worker: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, WorktreeManagerError>;

/// Outcome of attempting to merge a worktree branch back to main.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergeResult {
    Success,
    Conflict(Vec<String>),
    NothingToMerge,
}

pub trait GitRunner: Send + Sync {
    fn run_git(&self, dir: &str, args: &[&str]) -> std::result::Result<GitOutput, String>;
}

#[derive(Debug, Clone)]
pub struct GitOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

pub struct RealGitRunner;

impl GitRunner for RealGitRunner {
    fn run_git(&self, dir: &str, args: &[&str]) -> std::result::Result<GitOutput, String> {
        let output = std::process::Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .map_err(|e| e.to_string())?;

        Ok(GitOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerWorktree {
    pub path: String,
    pub branch: String,
    pub base_branch: String,
    pub worker_id: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorktreeStatus {
    pub branch: String,
    pub has_uncommitted_changes: bool,
    pub changed_files: Vec<String>,
    pub commits_ahead_of_main: u32,
}

/// High-level manager for per-worker persistent git worktrees.
pub struct WorktreeManager {
    base_dir: PathBuf,
    git: Box<dyn GitRunner>,
    git_read: Box<dyn GitReadAdapter>,
}

impl WorktreeManager {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            git: Box::new(RealGitRunner),
            git_read: default_read_adapter(),
        }
    }

    pub fn with_git_runner(base_dir: impl Into<PathBuf>, git: Box<dyn GitRunner>) -> Self {
        Self {
            base_dir: base_dir.into(),
            git,
            git_read: default_read_adapter(),
        }
    }

    pub fn with_adapters(
        base_dir: impl Into<PathBuf>,
        git: Box<dyn GitRunner>,
        git_read: Box<dyn GitReadAdapter>,
    ) -> Self {
        Self {
            base_dir: base_dir.into(),
            git,
            git_read,
        }
    }

    fn base_dir_str(&self) -> &str {
        self.base_dir.to_str().unwrap_or(".")
    }

    fn worker_worktree_path(&self, worker_id: &str) -> PathBuf {
        self.base_dir
            .join(".worktrees")
            .join(format!("worker-{}", sanitize_name(worker_id)))
    }

    /// Resolve the most specific base reference reachable: `origin/<base>`
    /// when the fetch succeeded and the remote tracking branch exists,
    /// otherwise the local `<base>` branch.
    fn resolve_base_ref(&self, base_branch: &str) -> String {
        let remote_ref = format!("origin/{base_branch}");
        match self
            .git
            .run_git(self.base_dir_str(), &["rev-parse", "--verify", &remote_ref])
        {
            Ok(output) if output.success => remote_ref,
            _ => base_branch.to_string(),
        }
    }

    fn branch_exists(&self, branch: &str) -> bool {
        matches!(
            self.git
                .run_git(self.base_dir_str(), &["rev-parse", "--verify", branch]),
            Ok(output) if output.success
        )
    }

    /// Get or create the persistent worktree for `worker_id`. When
    /// `task_id` is supplied and the worktree already exists, it is
    /// hard-reset and cleaned, then given a fresh (or reset) branch named
    /// `ringmaster/<sanitized-task-id>`. Otherwise a new worktree is created
    /// (or, if the branch already exists, attached without `-b`).
    pub async fn get_or_create_worktree(
        &self,
        worker_id: &str,
        task_id: Option<&str>,
        base_branch: &str,
    ) -> Result<WorkerWorktree> {
        let wt_path = self.worker_worktree_path(worker_id);
        let base_dir_str = self.base_dir_str().to_string();
        let base_ref = self.resolve_base_ref(base_branch);

        let branch_name = task_id
            .map(|t| format!("ringmaster/{}", sanitize_name(t)))
            .unwrap_or_else(|| format!("ringmaster/worker-{}", sanitize_name(worker_id)));

        if wt_path.exists() {
            let wt_path_str = wt_path.to_str().unwrap_or(".").to_string();
            info!(worker_id, path = %wt_path.display(), "reusing existing worker worktree");

            self.run_required(&wt_path_str, &["reset", "--hard", &base_ref])?;
            self.run_required(&wt_path_str, &["clean", "-fd"])?;

            if self.branch_exists(&branch_name) {
                self.run_required(&wt_path_str, &["checkout", "-B", &branch_name, &base_ref])?;
            } else {
                self.run_required(&wt_path_str, &["checkout", "-b", &branch_name, &base_ref])?;
            }

            return Ok(WorkerWorktree {
                path: wt_path_str,
                branch: branch_name,
                base_branch: base_branch.to_string(),
                worker_id: worker_id.to_string(),
                created_at: chrono::Utc::now(),
            });
        }

        let parent = wt_path.parent().expect(".worktrees parent");
        std::fs::create_dir_all(parent)?;
        let wt_path_str = wt_path.to_str().unwrap_or(".").to_string();

        info!(
            worker_id,
            path = %wt_path.display(),
            branch = %branch_name,
            "creating new worker worktree"
        );

        let attach_existing = self.branch_exists(&branch_name);
        let args: Vec<&str> = if attach_existing {
            vec!["worktree", "add", &wt_path_str, &branch_name]
        } else {
            vec!["worktree", "add", "-b", &branch_name, &wt_path_str, &base_ref]
        };

        match self.git.run_git(&base_dir_str, &args) {
            Ok(output) if output.success => Ok(WorkerWorktree {
                path: wt_path_str,
                branch: branch_name,
                base_branch: base_branch.to_string(),
                worker_id: worker_id.to_string(),
                created_at: chrono::Utc::now(),
            }),
            Ok(output) => Err(WorktreeManagerError::GitCommand(output.stderr)),
            Err(e) => Err(WorktreeManagerError::GitCommand(e)),
        }
    }

    fn run_required(&self, dir: &str, args: &[&str]) -> Result<GitOutput> {
        match self.git.run_git(dir, args) {
            Ok(output) if output.success => Ok(output),
            Ok(output) => Err(WorktreeManagerError::GitCommand(output.stderr)),
            Err(e) => Err(WorktreeManagerError::GitCommand(e)),
        }
    }

    /// Report branch, uncommitted-change flag, changed files, and commits
    /// ahead of `main` for a worker's worktree.
    pub async fn get_worktree_status(&self, worktree: &WorkerWorktree) -> Result<WorktreeStatus> {
        let branch = self
            .git_read
            .current_branch(&worktree.path)
            .map_err(|e| WorktreeManagerError::GitCommand(e.to_string()))?;
        let changed_files = self
            .git_read
            .status_porcelain(&worktree.path)
            .map_err(|e| WorktreeManagerError::GitCommand(e.to_string()))?;

        let ahead_output = self.run_required(
            &worktree.path,
            &["rev-list", "--count", "main..HEAD"],
        )?;
        let commits_ahead_of_main = ahead_output.stdout.trim().parse().unwrap_or(0);

        Ok(WorktreeStatus {
            has_uncommitted_changes: !changed_files.is_empty(),
            changed_files,
            commits_ahead_of_main,
            branch,
        })
    }

    /// Stage everything and commit. Returns `None` when the tree is clean.
    pub async fn commit_worktree_changes(
        &self,
        worktree: &WorkerWorktree,
        message: &str,
    ) -> Result<Option<String>> {
        let status = self
            .git_read
            .status_porcelain(&worktree.path)
            .map_err(|e| WorktreeManagerError::GitCommand(e.to_string()))?;
        if status.is_empty() {
            return Ok(None);
        }

        self.run_required(&worktree.path, &["add", "-A"])?;
        self.run_required(&worktree.path, &["commit", "-m", message])?;
        let hash_output = self.run_required(&worktree.path, &["rev-parse", "HEAD"])?;
        Ok(Some(hash_output.stdout.trim().to_string()))
    }

    /// Fetch the worktree branch into the main checkout and merge with
    /// `--no-ff`. Conflicts are reported, not raised: the caller gets
    /// `(false, message)` and the aborted merge leaves main untouched.
    pub async fn merge_worktree_to_main(
        &self,
        worktree: &WorkerWorktree,
    ) -> Result<(bool, String)> {
        let base_dir_str = self.base_dir_str().to_string();

        info!(branch = %worktree.branch, "attempting merge to main");

        if let Err(e) = self.git.run_git(&base_dir_str, &["fetch", "origin"]) {
            warn!(error = %e, "git fetch failed, proceeding with local state");
        }

        let diff_stdout = match self.git_read.diff_stat(&base_dir_str, "main", &worktree.branch) {
            Ok(stdout) => stdout,
            Err(e) => {
                warn!(error = %e, branch = %worktree.branch, "read adapter diff_stat failed, falling back");
                self.run_required(&base_dir_str, &["diff", "--stat", "main", &worktree.branch])?
                    .stdout
            }
        };

        if diff_stdout.trim().is_empty() {
            info!(branch = %worktree.branch, "nothing to merge");
            return Ok((true, "nothing to merge".to_string()));
        }

        let merge_result = self.git.run_git(
            &base_dir_str,
            &["merge", "--no-ff", "--no-commit", &worktree.branch],
        );

        match merge_result {
            Ok(output) if output.success => {
                let commit_msg = format!("Merge branch '{}' into main", worktree.branch);
                self.run_required(&base_dir_str, &["commit", "-m", &commit_msg])?;
                info!(branch = %worktree.branch, "merge successful");
                Ok((true, "merged".to_string()))
            }
            Ok(_output) => {
                let conflicts = match self.git_read.conflict_files(&base_dir_str) {
                    Ok(files) => files,
                    Err(e) => {
                        warn!(error = %e, "read adapter conflict_files failed, falling back");
                        self.run_required(&base_dir_str, &["diff", "--name-only", "--diff-filter=U"])?
                            .stdout
                            .lines()
                            .filter(|l| !l.is_empty())
                            .map(ToString::to_string)
                            .collect()
                    }
                };
                if let Err(e) = self.git.run_git(&base_dir_str, &["merge", "--abort"]) {
                    warn!(error = %e, "git merge --abort failed");
                }
                warn!(branch = %worktree.branch, conflicts = ?conflicts, "merge conflicts detected");
                Ok((false, format!("conflicts in: {}", conflicts.join(", "))))
            }
            Err(e) => Err(WorktreeManagerError::GitCommand(e)),
        }
    }

    /// Remove a worker's worktree. `force` skips the uncommitted-changes
    /// safety check that plain `git worktree remove` performs.
    pub async fn remove_worktree(&self, worktree: &WorkerWorktree, force: bool) -> Result<()> {
        let base_dir_str = self.base_dir_str().to_string();
        let mut args = vec!["worktree", "remove"];
        if force {
            args.push("--force");
        }
        args.push(&worktree.path);
        self.run_required(&base_dir_str, &args)?;
        Ok(())
    }

    /// Prune worktrees git itself considers stale (deleted directories, or
    /// directories untouched for `max_age`).
    pub async fn clean_stale_worktrees(&self, max_age: Duration) -> Result<Vec<PathBuf>> {
        let base_dir_str = self.base_dir_str().to_string();
        self.run_required(&base_dir_str, &["worktree", "prune"])?;

        let worktrees_dir = self.base_dir.join(".worktrees");
        let mut removed = Vec::new();
        if !worktrees_dir.exists() {
            return Ok(removed);
        }

        let cutoff = std::time::SystemTime::now()
            .checked_sub(max_age)
            .unwrap_or(std::time::SystemTime::UNIX_EPOCH);

        for entry in std::fs::read_dir(&worktrees_dir)?.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let metadata = std::fs::metadata(&path)?;
            let modified = metadata.modified().unwrap_or(std::time::SystemTime::UNIX_EPOCH);
            if modified < cutoff {
                let path_str = path.to_str().unwrap_or("").to_string();
                info!(path = %path.display(), "removing stale worker worktree");
                match self.git.run_git(&base_dir_str, &["worktree", "remove", "--force", &path_str]) {
                    Ok(output) if output.success => removed.push(path),
                    Ok(output) => warn!(path = %path.display(), stderr = %output.stderr, "failed to remove stale worktree"),
                    Err(e) => warn!(path = %path.display(), error = %e, "failed to remove stale worktree"),
                }
            }
        }

        Ok(removed)
    }
}

fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .collect::<String>()
        .to_lowercase()
}
