//! Types flowing through the Branch Merger / Merge Queue pipeline
//! (spec.md §3, §4.4-§4.8).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, Notify};
use uuid::Uuid;

use super::execution::ExecutionResult;
use super::task::TaskId;

/// Cooperative cancellation signal handed to a merge-queue consumer
/// alongside a [`MergeRequest`]. Grounded in the Pause Control gate's
/// level-triggered design (spec.md §4.3) rather than pulling in an external
/// cancellation-token crate the teacher doesn't depend on.
#[derive(Debug, Clone)]
pub struct CancellationHandle(Arc<CancellationInner>);

#[derive(Debug, Default)]
struct CancellationInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl Default for CancellationHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationHandle {
    pub fn new() -> Self {
        Self(Arc::new(CancellationInner::default()))
    }

    pub fn cancel(&self) {
        self.0.cancelled.store(true, Ordering::SeqCst);
        self.0.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once [`cancel`](Self::cancel) has been called. Safe to await
    /// repeatedly and from multiple clones.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        let notified = self.0.notify.notified();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

/// Outcome of a single merge attempt (spec.md §3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MergeOutcome {
    pub success: bool,
    pub error: Option<String>,
    pub fallback_used: bool,
    pub reason: Option<String>,
    pub conflict_files: Vec<String>,
}

impl MergeOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    pub fn conflict(conflict_files: Vec<String>, reason: impl Into<String>) -> Self {
        Self {
            success: false,
            reason: Some(reason.into()),
            conflict_files,
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// A queued unit of merge work: an agent's branch awaiting integration into
/// the session branch (spec.md §3). Carries a single-shot result channel and
/// a cancellation handle, matching the teacher's `merge_queue.rs` pattern of
/// pushing work into a queue and delivering the outcome back out-of-band,
/// adapted from request/response polling to an explicit oneshot channel
/// (grounded in `other_examples`'s `iepathos-prodigy` merge queue).
pub struct MergeRequest {
    pub task_id: TaskId,
    pub agent_id: String,
    pub agent_branch: String,
    pub execution_result: ExecutionResult,
    pub result_tx: oneshot::Sender<MergeOutcome>,
    pub cancellation: CancellationHandle,
}

impl MergeRequest {
    pub fn new(
        task_id: TaskId,
        agent_id: impl Into<String>,
        agent_branch: impl Into<String>,
        execution_result: ExecutionResult,
    ) -> (Self, oneshot::Receiver<MergeOutcome>, CancellationHandle) {
        let (result_tx, result_rx) = oneshot::channel();
        let cancellation = CancellationHandle::new();
        let request = Self {
            task_id,
            agent_id: agent_id.into(),
            agent_branch: agent_branch.into(),
            execution_result,
            result_tx,
            cancellation: cancellation.clone(),
        };
        (request, result_rx, cancellation)
    }
}

/// Opaque marker naming `(session_id, agent_id)`, storing the session-branch
/// head before a merge attempt for rollback (spec.md §3, §4.7).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub session_id: String,
    pub agent_id: String,
    pub head_commit: String,
    pub verdict: CheckpointVerdict,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointVerdict {
    Pending,
    Good,
    Bad,
}

impl Checkpoint {
    pub fn new(session_id: impl Into<String>, agent_id: impl Into<String>, head_commit: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            agent_id: agent_id.into(),
            head_commit: head_commit.into(),
            verdict: CheckpointVerdict::Pending,
            created_at: Utc::now(),
        }
    }

    /// Scoped name `<session_id>/<agent_id>` per spec.md §6 checkpoint naming.
    pub fn name(&self) -> String {
        format!("{}/{}", self.session_id, self.agent_id)
    }
}

/// Action chosen by the user in response to an [`EscalationRequest`]
/// (spec.md §3, §4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationAction {
    Retry,
    Skip,
    Abort,
    ManualFix,
}

/// Raised when a task exhausts retries or a merge cannot be resolved
/// (spec.md §3, §4.9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationRequest {
    pub id: Uuid,
    pub task_id: TaskId,
    pub failure_reason: String,
    pub validation_summary: Option<String>,
    pub worktree_path: Option<String>,
    pub attempt_count: u32,
    pub created_at: DateTime<Utc>,
}

impl EscalationRequest {
    pub fn new(
        task_id: TaskId,
        failure_reason: impl Into<String>,
        attempt_count: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_id,
            failure_reason: failure_reason.into(),
            validation_summary: None,
            worktree_path: None,
            attempt_count,
            created_at: Utc::now(),
        }
    }
}

/// The user's decision on an [`EscalationRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationResponse {
    pub request_id: Uuid,
    pub action: EscalationAction,
    pub message: Option<String>,
    pub decided_at: DateTime<Utc>,
}

impl EscalationResponse {
    pub fn new(request_id: Uuid, action: EscalationAction) -> Self {
        Self {
            request_id,
            action,
            message: None,
            decided_at: Utc::now(),
        }
    }
}
