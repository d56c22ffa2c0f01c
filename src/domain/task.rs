//! Task and task-status types (spec §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Default execution-attempt budget before a task is escalated; the
/// Scheduler actually enforces `OrchestratorConfig::max_retries`, which
/// defaults to this value.
pub const MAX_RETRIES: u32 = 3;

/// Opaque task identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Task lifecycle status (spec §3 invariant).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Ready,
    Running,
    Done,
    Failed,
    Blocked,
}

impl TaskStatus {
    /// A task in a terminal state no longer participates in scheduling.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Blocked)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Blocked => "blocked",
        };
        write!(f, "{s}")
    }
}

/// A unit of decomposed work dispatched to an external agent (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub parent_epic_id: Option<Uuid>,
    pub dependencies: Vec<TaskId>,
    pub execution_count: u32,
    pub blocked_reason: Option<String>,
    pub error: Option<String>,
    /// Declared file boundary the agent is expected to stay within, if any.
    pub file_boundary: Option<String>,
    pub tier: String,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    /// Bumped on every mutation; guards against lost updates between the
    /// scheduler loop and a concurrently-running escalation (spec §9 ambient
    /// addition, analogous to the teacher's optimistic-concurrency `version`).
    pub version: u32,
}

impl Task {
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: TaskId::new(),
            title: title.into(),
            description: description.into(),
            status: TaskStatus::Pending,
            parent_epic_id: None,
            dependencies: Vec::new(),
            execution_count: 0,
            blocked_reason: None,
            error: None,
            file_boundary: None,
            tier: "standard".to_string(),
            created_at: now,
            last_updated_at: now,
            version: 1,
        }
    }

    pub fn with_dependencies(mut self, deps: Vec<TaskId>) -> Self {
        self.dependencies = deps;
        self
    }

    /// Convenience check against the compiled-in default budget (spec §3);
    /// callers enforcing a configured budget compare `execution_count`
    /// against `OrchestratorConfig::max_retries` directly instead.
    pub const fn retries_exhausted(&self) -> bool {
        self.execution_count >= MAX_RETRIES
    }

    fn touch(&mut self) {
        self.last_updated_at = Utc::now();
        self.version += 1;
    }

    pub fn set_status(&mut self, status: TaskStatus) {
        self.status = status;
        self.touch();
    }

    pub fn block(&mut self, reason: impl Into<String>) {
        self.status = TaskStatus::Blocked;
        self.blocked_reason = Some(reason.into());
        self.touch();
    }
}
