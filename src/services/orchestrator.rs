//! Orchestrator Facade: composes the Task Graph, Scheduler, Merge Queue,
//! and Escalation Handler for one session and owns the session branch's
//! lifecycle (spec.md §4.11 ambient addition over the component design).
//!
//! Collaborators are wired in through their narrow interfaces only — the
//! Merge Queue and Escalation Handler never receive the facade itself, per
//! spec.md §9 Design Notes' warning against ownership cycles.

use std::sync::Arc;

use crate::domain::errors::{EscalationError, OrchestratorError, OrchestratorResult, PortError};
use crate::domain::merge::EscalationResponse;
use crate::domain::ports::{ClassificationHint, GitRunner, RequestClassifier, RequestKind, RunnerFactory, WorktreeManager};
use crate::domain::task::Task;
use crate::services::checkpoint::CheckpointService;
use crate::services::config::OrchestratorConfig;
use crate::services::escalation::EscalationHandler;
use crate::services::event_bus::EventBus;
use crate::services::merge_queue::MergeQueue;
use crate::services::pause_control::PauseControl;
use crate::services::scheduler::Scheduler;
use crate::services::semantic_merger::SemanticAutoMerger;
use crate::services::task_graph::TaskGraph;

use super::branch_merger::BranchMerger;
use super::merge_resolver_agent::MergeResolverAgent;

/// Everything the Orchestrator needs from the outside world, out of scope
/// for this crate's own implementation (spec.md §6).
pub struct OrchestratorDeps {
    pub runner_factory: Arc<dyn RunnerFactory>,
    pub worktree_manager: Arc<dyn WorktreeManager>,
    pub git: Arc<dyn GitRunner>,
}

/// One orchestration session: a task graph executed against a single
/// session branch, with its own event bus and pause gate.
pub struct Orchestrator {
    graph: TaskGraph,
    event_bus: Arc<EventBus>,
    pause_control: PauseControl,
    scheduler: Scheduler,
    checkpoints: Arc<CheckpointService>,
    escalation: Arc<EscalationHandler>,
    workdir: String,
    session_id: String,
    session_branch: String,
}

impl Orchestrator {
    pub fn new(
        config: &OrchestratorConfig,
        deps: OrchestratorDeps,
        workdir: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        let workdir = workdir.into();
        let session_id = session_id.into();
        // spec.md §6 branch naming: `main` in greenfield mode, otherwise the
        // configured `<prefix><id>` scheme.
        let session_branch = if config.greenfield {
            "main".to_string()
        } else {
            format!("{}{}", config.session_branch_prefix, session_id)
        };

        let graph = TaskGraph::new();
        let event_bus = Arc::new(EventBus::new(config.event_bus_capacity));
        let pause_control = PauseControl::new();
        let checkpoints = Arc::new(CheckpointService::new(deps.git.clone()));

        let branch_merger = Arc::new(BranchMerger::new(deps.git.clone(), config.rebase_retry_limit));
        let semantic_merger = Arc::new(SemanticAutoMerger::new(
            deps.runner_factory.clone(),
            deps.git.clone(),
            config.validate_command.clone(),
        ));
        let resolver_agent = Arc::new(MergeResolverAgent::new(
            deps.runner_factory.clone(),
            deps.git.clone(),
            config.max_resolver_attempts,
        ));
        let merge_queue = Arc::new(MergeQueue::new(
            config.merge_queue_capacity,
            event_bus.clone(),
            checkpoints.clone(),
            branch_merger,
            semantic_merger,
            resolver_agent,
            deps.git.clone(),
        ));

        let escalation = Arc::new(EscalationHandler::new(
            event_bus.clone(),
            pause_control.clone(),
            graph.clone(),
            std::time::Duration::from_secs(config.escalation_deadline_secs),
        ));

        let scheduler = Scheduler::new(
            graph.clone(),
            event_bus.clone(),
            pause_control.clone(),
            deps.runner_factory,
            deps.worktree_manager,
            merge_queue,
            escalation.clone(),
            deps.git.clone(),
            config.max_agents,
            workdir.clone(),
            session_id.clone(),
            session_branch.clone(),
            config.max_retries,
        );

        Self {
            graph,
            event_bus,
            pause_control,
            scheduler,
            checkpoints,
            escalation,
            workdir,
            session_id,
            session_branch,
        }
    }

    pub async fn add_task(&self, task: Task) -> OrchestratorResult<()> {
        self.graph.add_task(task).await
    }

    /// Snapshots a task's current state, e.g. to inspect the status an
    /// escalation decision left it in.
    pub async fn task(&self, id: crate::domain::task::TaskId) -> Option<Task> {
        self.graph.get_task(id).await
    }

    pub async fn subscribe(&self) -> tokio::sync::mpsc::Receiver<crate::domain::event::Event> {
        self.event_bus.subscribe().await
    }

    pub fn pause(&self) {
        self.pause_control.pause();
    }

    pub fn resume(&self) {
        self.pause_control.resume();
    }

    /// Delivers a human decision for an in-flight [`TaskEscalation`]
    /// (spec.md §4.9), identified by the event's `escalation_id`.
    ///
    /// [`TaskEscalation`]: crate::domain::event::EventPayload::TaskEscalation
    pub async fn respond_to_escalation(&self, response: EscalationResponse) -> Result<(), EscalationError> {
        self.escalation.respond(response).await
    }

    /// Classifies `request` through the given collaborator (spec.md §6 task
    /// classifier hint) and caps the scheduler's concurrency at
    /// `hint.max_agents` if that's tighter than the configured `MaxAgents`.
    /// Never raises concurrency back up. Use [`Self::is_quick_mode_candidate`]
    /// on the returned hint to decide between [`Self::run_quick`] and the
    /// normal `add_task`/[`Self::run`] path.
    pub async fn classify(
        &self,
        classifier: &dyn RequestClassifier,
        request: &str,
    ) -> Result<ClassificationHint, PortError> {
        let hint = classifier.classify(request).await?;
        self.scheduler.cap_concurrency(hint.max_agents as usize);
        Ok(hint)
    }

    /// `true` iff `hint` recommends the quick-mode path: `SETUP`/`BUGFIX`
    /// requests the classifier flags as trivial (spec.md §4.10, §6).
    pub fn is_quick_mode_candidate(hint: &ClassificationHint) -> bool {
        hint.recommend_quick_mode && matches!(hint.kind, RequestKind::Setup | RequestKind::Bugfix)
    }

    /// Quick-mode path (spec.md §4.10): bypasses decomposition, per-task
    /// worktrees, and the Merge Queue, running a single agent directly on
    /// the session branch and auto-committing any changes it makes.
    pub async fn run_quick(&self, prompt: &str) -> OrchestratorResult<bool> {
        let success = self.scheduler.run_quick(prompt).await?;
        self.event_bus.close().await;
        Ok(success)
    }

    /// Runs the session to completion, then garbage-collects its checkpoints
    /// (spec.md §4.7) and closes the event bus.
    pub async fn run(&self) -> OrchestratorResult<bool> {
        if self.graph.is_empty().await {
            return Err(OrchestratorError::ValidationFailed(
                "no tasks were submitted to this session".into(),
            ));
        }
        let success = self.scheduler.run().await?;
        self.checkpoints.cleanup_session(&self.workdir, &self.session_id).await;
        self.event_bus.close().await;
        Ok(success)
    }

    pub fn session_branch(&self) -> &str {
        &self.session_branch
    }
}
