//! Lifecycle event taxonomy published on the Event Bus (spec.md §3, §6).

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::task::TaskId;

/// Unique identifier for an event, grounded in the teacher's `EventId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic sequence number assigned by the Event Bus on emit, used by
/// subscribers to detect gaps left by drops (spec.md §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SequenceNumber(pub u64);

impl SequenceNumber {
    pub const fn zero() -> Self {
        Self(0)
    }
}

impl std::fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Process-local generator for [`SequenceNumber`]s.
#[derive(Debug, Default)]
pub struct SequenceCounter(AtomicU64);

impl SequenceCounter {
    pub const fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn next(&self) -> SequenceNumber {
        SequenceNumber(self.0.fetch_add(1, Ordering::SeqCst))
    }
}

/// The event taxonomy named verbatim in spec.md §6, tagged so the wire
/// representation carries a stable string `type` field regardless of how
/// the Rust variant is renamed internally.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum EventPayload {
    TaskQueued { task_id: TaskId },
    TaskStarted { task_id: TaskId, agent_id: String },
    TaskCompleted { task_id: TaskId },
    TaskFailed { task_id: TaskId, error: String },
    TaskBlocked { task_id: TaskId, reason: String },
    TaskRetry { task_id: TaskId, attempt: u32 },
    TaskSkipped { task_id: TaskId, reason: String },
    TaskEscalation {
        task_id: TaskId,
        /// Correlation id an external responder echoes back via
        /// `EscalationResponse::new` (spec.md §4.9).
        escalation_id: Uuid,
        attempt_count: u32,
        failure_reason: String,
        validation_summary: Option<String>,
        worktree_path: Option<String>,
    },
    ManualFixRequired { task_id: TaskId, worktree_path: String },
    MergeStarted { task_id: TaskId, agent_branch: String },
    MergeCompleted {
        task_id: TaskId,
        success: bool,
        error: Option<String>,
        fallback_used: bool,
    },
    SecondReviewStarted { task_id: TaskId },
    SecondReviewCompleted { task_id: TaskId, passed: bool },
    AgentProgress { task_id: TaskId, agent_id: String, message: String },
    EpicCreated { epic_id: Uuid, title: String },
    Abort { reason: String },
    SessionDone { success: bool },
}

impl EventPayload {
    /// Stable discriminant name, independent of how the payload is
    /// constructed; used for metrics and tests that assert on event shape
    /// without matching the whole enum.
    pub const fn variant_name(&self) -> &'static str {
        match self {
            Self::TaskQueued { .. } => "task_queued",
            Self::TaskStarted { .. } => "task_started",
            Self::TaskCompleted { .. } => "task_completed",
            Self::TaskFailed { .. } => "task_failed",
            Self::TaskBlocked { .. } => "task_blocked",
            Self::TaskRetry { .. } => "task_retry",
            Self::TaskSkipped { .. } => "task_skipped",
            Self::TaskEscalation { .. } => "task_escalation",
            Self::ManualFixRequired { .. } => "manual_fix_required",
            Self::MergeStarted { .. } => "merge_started",
            Self::MergeCompleted { .. } => "merge_completed",
            Self::SecondReviewStarted { .. } => "second_review_started",
            Self::SecondReviewCompleted { .. } => "second_review_completed",
            Self::AgentProgress { .. } => "agent_progress",
            Self::EpicCreated { .. } => "epic_created",
            Self::Abort { .. } => "abort",
            Self::SessionDone { .. } => "session_done",
        }
    }

    pub fn task_id(&self) -> Option<TaskId> {
        match self {
            Self::TaskQueued { task_id }
            | Self::TaskStarted { task_id, .. }
            | Self::TaskCompleted { task_id }
            | Self::TaskFailed { task_id, .. }
            | Self::TaskBlocked { task_id, .. }
            | Self::TaskRetry { task_id, .. }
            | Self::TaskSkipped { task_id, .. }
            | Self::TaskEscalation { task_id, .. }
            | Self::ManualFixRequired { task_id, .. }
            | Self::MergeStarted { task_id, .. }
            | Self::MergeCompleted { task_id, .. }
            | Self::SecondReviewStarted { task_id }
            | Self::SecondReviewCompleted { task_id, .. }
            | Self::AgentProgress { task_id, .. } => Some(*task_id),
            Self::EpicCreated { .. } | Self::Abort { .. } | Self::SessionDone { .. } => None,
        }
    }
}

/// Envelope wrapping a payload with the metadata every event carries
/// (spec.md §3): timestamp plus optional task/agent/parent correlation and
/// free-form metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub sequence: SequenceNumber,
    pub timestamp: DateTime<Utc>,
    pub agent_id: Option<String>,
    pub parent_id: Option<Uuid>,
    pub message: Option<String>,
    pub error: Option<String>,
    pub metadata: Option<Value>,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(sequence: SequenceNumber, payload: EventPayload) -> Self {
        Self {
            id: EventId::new(),
            sequence,
            timestamp: Utc::now(),
            agent_id: None,
            parent_id: None,
            message: None,
            error: None,
            metadata: None,
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_counter_is_monotonic() {
        let counter = SequenceCounter::new();
        let a = counter.next();
        let b = counter.next();
        assert!(b > a);
    }

    #[test]
    fn variant_name_matches_spec_taxonomy() {
        let task_id = TaskId::new();
        assert_eq!(
            EventPayload::TaskQueued { task_id }.variant_name(),
            "task_queued"
        );
        assert_eq!(
            EventPayload::SessionDone { success: true }.variant_name(),
            "session_done"
        );
    }

    #[test]
    fn task_id_extraction_is_none_for_session_scoped_events() {
        assert!(EventPayload::Abort { reason: "x".into() }.task_id().is_none());
        let task_id = TaskId::new();
        assert_eq!(
            EventPayload::TaskStarted { task_id, agent_id: "a".into() }.task_id(),
            Some(task_id)
        );
    }
}
