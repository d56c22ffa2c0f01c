//! Results coming back from an agent run and their translation into a
//! task-level outcome (spec.md §3, §4.10).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::task::TaskId;

/// Raw result handed back by the external agent runner (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub verified: bool,
    pub output: String,
    pub worktree_path: String,
    pub agent_id: String,
    pub branch_name: String,
    pub tokens: u64,
    pub duration: Duration,
    pub loop_iterations: u32,
    pub loop_exit_reason: LoopExitReason,
    pub log_file: Option<String>,
}

/// Why the agent's internal retry loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopExitReason {
    Completed,
    MaxIterationsReached,
    Cancelled,
    RunnerError,
}

impl ExecutionResult {
    /// `NeedsEscalation` per spec.md §4.9: not-success or not-verified AND
    /// (the loop ran out of iterations OR the task has exhausted its
    /// retries). The retry-count half of the predicate is evaluated by the
    /// caller, which has access to the task; this only covers the
    /// execution-result half.
    pub const fn loop_exhausted(&self) -> bool {
        matches!(self.loop_exit_reason, LoopExitReason::MaxIterationsReached)
    }

    pub const fn needs_attention(&self) -> bool {
        !self.success || !self.verified
    }
}

/// Terminal classification of a task's attempt, after merge outcome is
/// folded in (spec.md §4.10, closed per the teacher's `ExecutionStatus`
/// sum-type convention).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskOutcome {
    Success,
    Failed { reason: String },
    Aborted,
    MergeFailed { conflict_files: Vec<String> },
    Cancelled,
    Escalation { task_id: TaskId },
}
