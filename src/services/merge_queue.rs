//! Merge Queue: the single-consumer pipeline that drains queued
//! [`MergeRequest`]s through Branch Merger → Semantic Auto-Merger → Merge
//! Resolver Agent (spec.md §4.8).
//!
//! Grounded in the teacher's `MergeQueue` (queue + stats + sequential
//! `process_next` worker), re-scoped from its two-stage agent→task→main
//! design to this spec's single session-branch target and three-tier
//! conflict-resolution fallback.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};

use crate::domain::errors::OrchestratorError;
use crate::domain::event::EventPayload;
use crate::domain::merge::{MergeOutcome, MergeRequest};
use crate::domain::ports::GitRunner;

use super::branch_merger::BranchMerger;
use super::checkpoint::CheckpointService;
use super::event_bus::EventBus;
use super::merge_resolver_agent::MergeResolverAgent;
use super::semantic_merger::SemanticAutoMerger;

/// A [`MergeRequest`] plus the session context the queue needs to act on it.
pub struct QueuedMerge {
    pub request: MergeRequest,
    pub workdir: String,
    pub session_id: String,
    pub session_branch: String,
}

/// Running totals exposed via [`MergeQueue::stats`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MergeQueueStats {
    pub total: u64,
    pub successes: u64,
    pub failures: u64,
    pub semantic_attempts: u64,
    pub fallback_attempts: u64,
    pub retry_count: u64,
}

/// Sequential consumer of queued merges. Construction spawns the worker
/// loop; dropping every [`MergeQueueHandle`] clone closes the channel and
/// lets the worker drain and exit.
pub struct MergeQueue {
    sender: mpsc::Sender<QueuedMerge>,
    stats: Arc<RwLock<MergeQueueStats>>,
}

impl MergeQueue {
    pub fn new(
        capacity: usize,
        event_bus: Arc<EventBus>,
        checkpoints: Arc<CheckpointService>,
        branch_merger: Arc<BranchMerger>,
        semantic_merger: Arc<SemanticAutoMerger>,
        resolver_agent: Arc<MergeResolverAgent>,
        git: Arc<dyn GitRunner>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(capacity);
        let stats = Arc::new(RwLock::new(MergeQueueStats::default()));

        let worker = Worker {
            event_bus,
            checkpoints,
            branch_merger,
            semantic_merger,
            resolver_agent,
            git,
            stats: stats.clone(),
        };
        tokio::spawn(worker.run(receiver));

        Self { sender, stats }
    }

    /// Enqueues a merge; backpressures the caller if the queue is full
    /// rather than dropping work, since merges (unlike events) must not be
    /// silently lost.
    pub async fn enqueue(&self, item: QueuedMerge) -> Result<(), OrchestratorError> {
        self.sender
            .send(item)
            .await
            .map_err(|_| OrchestratorError::RepoStateCorrupt("merge queue worker has exited".into()))
    }

    pub async fn stats(&self) -> MergeQueueStats {
        self.stats.read().await.clone()
    }
}

struct Worker {
    event_bus: Arc<EventBus>,
    checkpoints: Arc<CheckpointService>,
    branch_merger: Arc<BranchMerger>,
    semantic_merger: Arc<SemanticAutoMerger>,
    resolver_agent: Arc<MergeResolverAgent>,
    git: Arc<dyn GitRunner>,
    stats: Arc<RwLock<MergeQueueStats>>,
}

impl Worker {
    async fn run(self, mut receiver: mpsc::Receiver<QueuedMerge>) {
        while let Some(item) = receiver.recv().await {
            self.process(item).await;
        }
    }

    /// Implements spec.md §4.8 steps 1-6.
    async fn process(&self, item: QueuedMerge) {
        let QueuedMerge {
            request,
            workdir,
            session_id,
            session_branch,
        } = item;

        self.stats.write().await.total += 1;
        self.event_bus
            .emit(EventPayload::MergeStarted {
                task_id: request.task_id,
                agent_branch: request.agent_branch.clone(),
            })
            .await;

        let checkpoint = match self.checkpoints.create(&workdir, &session_id, &request.agent_id).await {
            Ok(checkpoint) => checkpoint,
            Err(err) => {
                self.finish(request, false, Some(err.to_string()), false, Vec::new()).await;
                return;
            }
        };

        let attempt = self
            .branch_merger
            .merge(&workdir, &session_branch, &request.agent_branch)
            .await;

        let attempt = match attempt {
            Ok(attempt) => attempt,
            Err(err) => {
                self.checkpoints.mark_bad(&session_id, &request.agent_id).await;
                self.finish(request, false, Some(err.to_string()), false, Vec::new()).await;
                return;
            }
        };

        if attempt.success {
            self.checkpoints.mark_good(&session_id, &request.agent_id).await;
            self.finish(request, true, None, false, Vec::new()).await;
            return;
        }

        if attempt.conflict_files.is_empty() {
            self.checkpoints.mark_bad(&session_id, &request.agent_id).await;
            self.finish(
                request,
                false,
                Some("merge failed with no recoverable conflict set".into()),
                false,
                Vec::new(),
            )
            .await;
            return;
        }

        if self
            .try_semantic(&workdir, &session_branch, &request, &attempt.conflict_files)
            .await
        {
            self.checkpoints.mark_good(&session_id, &request.agent_id).await;
            self.finish(request, true, None, true, Vec::new()).await;
            return;
        }

        self.stats.write().await.fallback_attempts += 1;
        let fallback = self
            .resolver_agent
            .resolve(
                &workdir,
                &session_branch,
                &request.agent_branch,
                &attempt.conflict_files,
            )
            .await;

        match fallback {
            Ok(outcome) if outcome.success => {
                self.checkpoints.mark_good(&session_id, &request.agent_id).await;
                self.finish(request, true, None, true, Vec::new()).await;
            }
            Ok(outcome) => {
                self.checkpoints.mark_bad(&session_id, &request.agent_id).await;
                let _ = self
                    .checkpoints
                    .rollback(&workdir, &checkpoint.session_id, &checkpoint.agent_id)
                    .await;
                self.finish(request, false, outcome.reason, true, outcome.conflict_files).await;
            }
            Err(err) => {
                self.checkpoints.mark_bad(&session_id, &request.agent_id).await;
                let _ = self
                    .checkpoints
                    .rollback(&workdir, &checkpoint.session_id, &checkpoint.agent_id)
                    .await;
                self.finish(request, false, Some(err.to_string()), true, attempt.conflict_files)
                    .await;
            }
        }
    }

    /// Attempts the syntactic-eligibility path before falling back to the
    /// resolver agent. Returns `true` only on a committed semantic merge.
    async fn try_semantic(
        &self,
        workdir: &str,
        session_branch: &str,
        request: &MergeRequest,
        conflict_files: &[String],
    ) -> bool {
        let diff_ours = self
            .git
            .exec(workdir, &["diff", session_branch])
            .await
            .map(|out| out.stdout)
            .unwrap_or_default();
        let diff_theirs = self
            .git
            .exec(workdir, &["diff", &request.agent_branch])
            .await
            .map(|out| out.stdout)
            .unwrap_or_default();

        if !SemanticAutoMerger::can_auto_merge(&diff_ours, &diff_theirs) {
            return false;
        }

        self.stats.write().await.semantic_attempts += 1;
        matches!(
            self.semantic_merger
                .resolve(workdir, conflict_files, &diff_ours, &diff_theirs)
                .await,
            Ok(MergeOutcome { success: true, .. })
        )
    }

    async fn finish(
        &self,
        request: MergeRequest,
        success: bool,
        error: Option<String>,
        fallback_used: bool,
        conflict_files: Vec<String>,
    ) {
        {
            let mut stats = self.stats.write().await;
            if success {
                stats.successes += 1;
            } else {
                stats.failures += 1;
            }
        }

        self.event_bus
            .emit(EventPayload::MergeCompleted {
                task_id: request.task_id,
                success,
                error: error.clone(),
                fallback_used,
            })
            .await;

        let outcome = if success {
            MergeOutcome::ok()
        } else if conflict_files.is_empty() {
            MergeOutcome::failed(error.unwrap_or_else(|| "merge failed".into()))
        } else {
            MergeOutcome::conflict(conflict_files, error.unwrap_or_else(|| "merge failed".into()))
        };
        let _ = request.result_tx.send(outcome);
    }
}
