//! Narrow collaborator interfaces the kernel depends on (spec.md §6).
//!
//! Everything here is out of scope for this crate's implementation — the
//! external agent subprocess, git, worktrees, cross-session progress
//! tracking, protected-path policy, and the request classifier all live
//! behind these traits so the kernel core never depends on a concrete
//! collaborator.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::errors::PortError;
use super::execution::ExecutionResult;
use super::task::TaskId;

/// Options accepted by [`AgentRunner::start_with_options`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunnerOptions {
    pub max_iterations: Option<u32>,
    pub tier: Option<String>,
    pub env: Vec<(String, String)>,
}

/// A single running (or finished) agent process.
#[async_trait]
pub trait AgentRunner: Send + Sync {
    /// Launches the agent with a prompt in the given working directory.
    async fn start(&self, prompt: &str, cwd: &str) -> Result<(), PortError>;

    /// Like [`start`](Self::start) with runner-specific tuning knobs.
    async fn start_with_options(
        &self,
        prompt: &str,
        cwd: &str,
        options: RunnerOptions,
    ) -> Result<(), PortError>;

    /// Streams incremental progress lines as the agent runs.
    fn output(&self) -> mpsc::Receiver<String>;

    /// Blocks until the agent exits and returns its result.
    async fn wait(&self) -> Result<ExecutionResult, PortError>;

    /// Terminates the agent process, if still running.
    async fn kill(&self) -> Result<(), PortError>;
}

/// Produces fresh [`AgentRunner`] handles.
#[async_trait]
pub trait RunnerFactory: Send + Sync {
    async fn new_runner(&self) -> Result<Box<dyn AgentRunner>, PortError>;
}

/// Result of a raw git command invocation.
#[derive(Debug, Clone)]
pub struct GitCommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Git operations the kernel needs outside of worktree lifecycle management.
#[async_trait]
pub trait GitRunner: Send + Sync {
    async fn status(&self, cwd: &str) -> Result<String, PortError>;

    async fn show_file(&self, cwd: &str, git_ref: &str, path: &str) -> Result<String, PortError>;

    /// Escape hatch for the Branch Merger's state-machine steps
    /// (checkout, merge, merge --abort, rev-parse, merge-tree), which need
    /// arbitrary argument lists rather than a method per git subcommand.
    async fn exec(&self, cwd: &str, args: &[&str]) -> Result<GitCommandOutput, PortError>;
}

/// A worktree entry as reported by [`WorktreeManager::list`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorktreeInfo {
    pub path: String,
    pub branch: String,
}

/// Creates and tears down the isolated worktrees agents run in.
#[async_trait]
pub trait WorktreeManager: Send + Sync {
    async fn create(&self, branch: &str, path: &str) -> Result<(), PortError>;
    async fn remove(&self, path: &str) -> Result<(), PortError>;
    async fn list(&self) -> Result<Vec<WorktreeInfo>, PortError>;
    async fn prune(&self) -> Result<(), PortError>;
}

/// Cross-session progress persistence ("prog"), out of scope for this
/// crate's implementation — consumed only through this trait.
#[async_trait]
pub trait ProgTracker: Send + Sync {
    async fn create_epic(&self, title: &str) -> Result<Uuid, PortError>;
    async fn create_task(&self, epic_id: Uuid, title: &str, description: &str)
        -> Result<TaskId, PortError>;
    async fn add_dependency(&self, task_id: TaskId, depends_on: TaskId) -> Result<(), PortError>;
    async fn start(&self, task_id: TaskId) -> Result<(), PortError>;
    async fn done(&self, task_id: TaskId) -> Result<(), PortError>;
    async fn block(&self, task_id: TaskId, reason: &str) -> Result<(), PortError>;
    async fn cancel(&self, task_id: TaskId) -> Result<(), PortError>;
    async fn reopen(&self, task_id: TaskId) -> Result<(), PortError>;
    async fn add_log(&self, task_id: TaskId, message: &str) -> Result<(), PortError>;
    async fn add_learning(&self, task_id: TaskId, learning: &str) -> Result<(), PortError>;
    async fn list_open_or_in_progress_epics(&self) -> Result<Vec<Uuid>, PortError>;
    async fn get_incomplete_tasks(&self, epic_id: Uuid) -> Result<Vec<TaskId>, PortError>;
    async fn compute_epic_progress(&self, epic_id: Uuid) -> Result<f64, PortError>;
}

/// Policy lookup for paths agents must not touch.
#[async_trait]
pub trait ProtectedAreaDetector: Send + Sync {
    async fn is_protected(&self, path: &str) -> bool;
}

/// Coarse classification of a natural-language request, produced by a
/// regex-keyword heuristic collaborator (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Setup,
    Feature,
    Bugfix,
    Refactor,
}

/// Policy hint returned by [`RequestClassifier::classify`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationHint {
    pub kind: RequestKind,
    pub confidence: f64,
    pub recommend_quick_mode: bool,
    /// Always in `1..=4`, per spec.md §6.
    pub max_agents: u8,
    pub keywords: Vec<String>,
}

#[async_trait]
pub trait RequestClassifier: Send + Sync {
    async fn classify(&self, request: &str) -> Result<ClassificationHint, PortError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_hint_is_serde_round_trippable() {
        let hint = ClassificationHint {
            kind: RequestKind::Bugfix,
            confidence: 0.9,
            recommend_quick_mode: true,
            max_agents: 1,
            keywords: vec!["fix".into(), "crash".into()],
        };
        let json = serde_json::to_string(&hint).unwrap();
        let back: ClassificationHint = serde_json::from_str(&json).unwrap();
        assert_eq!(back.max_agents, 1);
        assert!(back.recommend_quick_mode);
    }
}
