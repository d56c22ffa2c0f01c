//! Domain errors for the orchestration kernel.

use thiserror::Error;

use super::task::TaskId;

/// Abstract error kinds the kernel reasons about (spec §7).
///
/// Every fallible kernel operation ultimately reduces to one of these kinds
/// so the Escalation Handler can apply a uniform retry/skip/abort policy
/// instead of pattern-matching on error strings.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("dependency cycle detected involving task: {0}")]
    DependencyCycle(TaskId),

    #[error("invalid status transition from {from} to {to}")]
    InvalidStatusTransition { from: String, to: String },

    #[error("transient agent error: {0}")]
    TransientAgent(String),

    #[error("validation failed: {0}")]
    ValidationFailed(String),

    #[error("recoverable merge conflict in: {0:?}")]
    MergeConflictRecoverable(Vec<String>),

    #[error("unrecoverable merge conflict in: {0:?}")]
    MergeConflictUnrecoverable(Vec<String>),

    #[error("repository state corrupt: {0}")]
    RepoStateCorrupt(String),

    #[error("execution aborted by user")]
    UserAbort,

    #[error("timed out waiting on: {0}")]
    Timeout(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("run invoked after Stop")]
    AlreadyStopped,

    #[error(transparent)]
    Cancelled(#[from] tokio::task::JoinError),
}

impl OrchestratorError {
    /// Retried up to `MaxRetries` per task before escalation (spec §7).
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientAgent(_) | Self::ValidationFailed(_))
    }

    /// Never escalated to the user directly — handled by the merge pipeline.
    pub const fn is_merge_recoverable(&self) -> bool {
        matches!(self, Self::MergeConflictRecoverable(_))
    }

    /// Terminal: the scheduler must stop and surface this to its caller.
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::UserAbort | Self::RepoStateCorrupt(_) | Self::AlreadyStopped
        )
    }
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// Error raised when an escalation cannot be accepted (spec §4.9 step 1).
#[derive(Debug, Error)]
pub enum EscalationError {
    #[error("an escalation is already in progress for task {0}")]
    AlreadyActive(TaskId),

    #[error("escalation wait timed out")]
    TimedOut,

    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
}

/// Error raised by collaborator ports (spec §6), kept separate from
/// `OrchestratorError` because these originate outside the kernel boundary.
#[derive(Debug, Error)]
pub enum PortError {
    #[error("runner unavailable: {0}")]
    RunnerUnavailable(String),

    #[error("git command failed: {0}")]
    GitFailed(String),

    #[error("worktree operation failed: {0}")]
    WorktreeFailed(String),

    #[error("prog tracker operation failed: {0}")]
    ProgFailed(String),

    #[error("classifier unavailable: {0}")]
    ClassifierUnavailable(String),
}

impl From<PortError> for OrchestratorError {
    fn from(err: PortError) -> Self {
        match err {
            PortError::GitFailed(msg) => OrchestratorError::RepoStateCorrupt(msg),
            other => OrchestratorError::TransientAgent(other.to_string()),
        }
    }
}
