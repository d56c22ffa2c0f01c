//! Branch Merger: the git-level merge/rebase state machine against the
//! session branch (spec.md §4.4).
//!
//! ```text
//!         start
//!           │ checkout session
//!           ▼
//!     ATTEMPT_MERGE ──success──▶ DONE(success, diff, files)
//!           │ conflict
//!           ▼
//!       ABORT_MERGE
//!           │
//!           ▼
//!     REBASE_AGENT_ON_SESSION ──fail──▶ abort_rebase, checkout session
//!           │ success                              │
//!           ▼                                      ▼
//!    RETRY_MERGE ──success──▶ DONE         DONE(NeedsSemantic, conflictFiles)
//!           │ fail
//!           ▼
//!       ABORT_MERGE, DONE(NeedsSemantic, conflictFiles)
//! ```
//!
//! Conflict detection via `git merge-tree` is grounded in the teacher's
//! `merge_queue::check_merge_conflicts`, which reads merge-tree output
//! without mutating the worktree.

use std::sync::Arc;

use crate::domain::errors::{OrchestratorError, OrchestratorResult, PortError};
use crate::domain::ports::GitRunner;

/// Outcome of one full pass through the state machine.
#[derive(Debug, Clone, Default)]
pub struct MergeAttemptOutcome {
    pub success: bool,
    pub needs_semantic: bool,
    pub diff: Option<String>,
    pub changed_files: Vec<String>,
    pub conflict_files: Vec<String>,
}

pub struct BranchMerger {
    git: Arc<dyn GitRunner>,
    rebase_retry_limit: u32,
}

impl BranchMerger {
    pub fn new(git: Arc<dyn GitRunner>, rebase_retry_limit: u32) -> Self {
        Self {
            git,
            rebase_retry_limit,
        }
    }

    /// Runs the state machine to completion. On every exit path the
    /// repository is left checked out to `session_branch` with a clean
    /// working tree (spec.md §4.4 invariant).
    pub async fn merge(
        &self,
        workdir: &str,
        session_branch: &str,
        agent_branch: &str,
    ) -> OrchestratorResult<MergeAttemptOutcome> {
        self.checkout(workdir, session_branch).await?;

        if !self.has_conflicts(workdir, agent_branch, session_branch).await? {
            return self.attempt_merge(workdir, session_branch, agent_branch).await;
        }

        self.abort_merge(workdir).await;

        let mut attempt = 0;
        loop {
            if attempt >= self.rebase_retry_limit {
                self.checkout(workdir, session_branch).await?;
                let conflict_files = self
                    .conflict_files(workdir, agent_branch, session_branch)
                    .await
                    .unwrap_or_default();
                return Ok(MergeAttemptOutcome {
                    needs_semantic: true,
                    conflict_files,
                    ..Default::default()
                });
            }
            attempt += 1;

            // Best-effort fast-forward; absence of a remote is not fatal.
            let _ = self.git.exec(workdir, &["pull", "--ff-only"]).await;

            self.checkout(workdir, agent_branch).await?;
            let rebase = self
                .git
                .exec(workdir, &["rebase", session_branch])
                .await
                .map_err(OrchestratorError::from)?;

            if !rebase.success {
                let _ = self.git.exec(workdir, &["rebase", "--abort"]).await;
                self.checkout(workdir, session_branch).await?;
                let conflict_files = self
                    .conflict_files(workdir, agent_branch, session_branch)
                    .await
                    .unwrap_or_default();
                return Ok(MergeAttemptOutcome {
                    needs_semantic: true,
                    conflict_files,
                    ..Default::default()
                });
            }

            self.checkout(workdir, session_branch).await?;
            let outcome = self.attempt_merge(workdir, session_branch, agent_branch).await?;
            if outcome.success {
                return Ok(outcome);
            }
            self.abort_merge(workdir).await;
        }
    }

    async fn attempt_merge(
        &self,
        workdir: &str,
        session_branch: &str,
        agent_branch: &str,
    ) -> OrchestratorResult<MergeAttemptOutcome> {
        let message = format!("Merge {agent_branch} into {session_branch}");
        let merge = self
            .git
            .exec(workdir, &["merge", "--no-ff", "-m", &message, "--", agent_branch])
            .await
            .map_err(OrchestratorError::from)?;

        if !merge.success {
            return Ok(MergeAttemptOutcome::default());
        }

        let diff = self
            .git
            .exec(workdir, &["diff", "HEAD^..HEAD"])
            .await
            .map(|out| out.stdout)
            .ok();
        let changed_files = self
            .git
            .exec(workdir, &["diff", "--name-only", "HEAD^..HEAD"])
            .await
            .map(|out| out.stdout.lines().map(str::to_string).collect())
            .unwrap_or_default();

        Ok(MergeAttemptOutcome {
            success: true,
            diff,
            changed_files,
            ..Default::default()
        })
    }

    async fn has_conflicts(&self, workdir: &str, source: &str, target: &str) -> OrchestratorResult<bool> {
        let output = self
            .git
            .exec(workdir, &["merge-tree", target, source])
            .await
            .map_err(OrchestratorError::from)?;
        Ok(output.stdout.contains("<<<<<<<") || output.stdout.contains(">>>>>>>"))
    }

    async fn conflict_files(&self, workdir: &str, source: &str, target: &str) -> Result<Vec<String>, PortError> {
        let output = self.git.exec(workdir, &["merge-tree", target, source]).await?;
        let mut files = Vec::new();
        for line in output.stdout.lines() {
            if let Some(rest) = line.strip_prefix("+++ ").or_else(|| line.strip_prefix("--- ")) {
                let raw = rest.split_whitespace().next().unwrap_or(rest);
                let path = raw.strip_prefix("a/").or_else(|| raw.strip_prefix("b/")).unwrap_or(raw);
                if path != "/dev/null" && !files.iter().any(|f| f == path) {
                    files.push(path.to_string());
                }
            }
        }
        Ok(files)
    }

    async fn checkout(&self, workdir: &str, branch: &str) -> OrchestratorResult<()> {
        let output = self
            .git
            .exec(workdir, &["checkout", branch])
            .await
            .map_err(OrchestratorError::from)?;
        if !output.success {
            return Err(OrchestratorError::RepoStateCorrupt(format!(
                "checkout {branch} failed: {}",
                output.stderr
            )));
        }
        Ok(())
    }

    async fn abort_merge(&self, workdir: &str) {
        let _ = self.git.exec(workdir, &["merge", "--abort"]).await;
    }
}
