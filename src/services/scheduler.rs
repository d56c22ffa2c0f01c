//! Scheduler: the decompose→dispatch loop that drives ready tasks onto
//! agents, bounded by `MaxAgents` (spec.md §4.10).
//!
//! Concurrency is bounded with a [`tokio::sync::Semaphore`], grounded in the
//! teacher's `SwarmOrchestrator::agent_semaphore`, rather than a hand-rolled
//! running-count check against `MaxAgents`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{Notify, Semaphore};

use crate::domain::errors::{OrchestratorError, OrchestratorResult};
use crate::domain::event::EventPayload;
use crate::domain::merge::{EscalationAction, EscalationRequest, MergeRequest};
use crate::domain::ports::{GitRunner, RunnerFactory, WorktreeManager};
use crate::domain::task::{Task, TaskId, TaskStatus};

use super::escalation::EscalationHandler;
use super::event_bus::EventBus;
use super::merge_queue::{MergeQueue, QueuedMerge};
use super::pause_control::PauseControl;
use super::task_graph::TaskGraph;

/// Collaborators and session identity the scheduler needs to dispatch one
/// task (spec.md §4.10, §6).
pub struct Scheduler {
    graph: TaskGraph,
    event_bus: Arc<EventBus>,
    pause_control: PauseControl,
    runner_factory: Arc<dyn RunnerFactory>,
    worktree_manager: Arc<dyn WorktreeManager>,
    merge_queue: Arc<MergeQueue>,
    escalation: Arc<EscalationHandler>,
    /// Only used by the quick-mode path (spec.md §4.10), which commits
    /// directly to the session branch instead of routing through the Merge
    /// Queue.
    git: Arc<dyn GitRunner>,
    semaphore: Arc<Semaphore>,
    workdir: String,
    session_id: String,
    session_branch: String,
    aborted: Arc<AtomicBool>,
    progress: Arc<Notify>,
    max_retries: u32,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        graph: TaskGraph,
        event_bus: Arc<EventBus>,
        pause_control: PauseControl,
        runner_factory: Arc<dyn RunnerFactory>,
        worktree_manager: Arc<dyn WorktreeManager>,
        merge_queue: Arc<MergeQueue>,
        escalation: Arc<EscalationHandler>,
        git: Arc<dyn GitRunner>,
        max_agents: usize,
        workdir: impl Into<String>,
        session_id: impl Into<String>,
        session_branch: impl Into<String>,
        max_retries: u32,
    ) -> Self {
        Self {
            graph,
            event_bus,
            pause_control,
            runner_factory,
            worktree_manager,
            merge_queue,
            escalation,
            git,
            semaphore: Arc::new(Semaphore::new(max_agents)),
            workdir: workdir.into(),
            session_id: session_id.into(),
            session_branch: session_branch.into(),
            aborted: Arc::new(AtomicBool::new(false)),
            progress: Arc::new(Notify::new()),
            max_retries,
        }
    }

    /// Runs until every task reaches a terminal state, or the session is
    /// aborted. Returns `true` iff the session succeeded (spec.md §4.10
    /// termination rule: at least one task done, none failed by abort).
    pub async fn run(&self) -> OrchestratorResult<bool> {
        loop {
            self.pause_control.wait_if_paused(std::future::pending()).await;

            if self.aborted.load(Ordering::SeqCst) || self.graph.all_terminal().await {
                break;
            }

            let ready = self.graph.ready_tasks().await;
            if ready.is_empty() {
                self.await_progress_or_idle().await;
                continue;
            }

            for task in ready {
                if self.aborted.load(Ordering::SeqCst) {
                    break;
                }
                let Ok(permit) = self.semaphore.clone().try_acquire_owned() else {
                    break;
                };
                self.graph.set_status(task.id, TaskStatus::Running).await?;
                self.event_bus
                    .emit(EventPayload::TaskStarted {
                        task_id: task.id,
                        agent_id: task.id.to_string(),
                    })
                    .await;

                let worker = self.dispatch(task);
                let progress = self.progress.clone();
                tokio::spawn(async move {
                    worker.await;
                    drop(permit);
                    progress.notify_waiters();
                });
            }
        }

        let counts = self.graph.count_by_status().await;
        let any_done = counts.get(&TaskStatus::Done).copied().unwrap_or(0) > 0;
        let success = any_done && !self.aborted.load(Ordering::SeqCst);
        self.event_bus.emit(EventPayload::SessionDone { success }).await;
        Ok(success)
    }

    /// Permanently lowers the dispatch loop's concurrency bound to at most
    /// `max_agents`, never raises it (spec.md §6: the classifier hint caps
    /// `MaxAgents`, it doesn't override the configured ceiling upward).
    pub fn cap_concurrency(&self, max_agents: usize) {
        let available = self.semaphore.available_permits();
        if available > max_agents {
            self.semaphore.forget_permits(available - max_agents);
        }
    }

    /// Quick-mode path (spec.md §4.10): bypasses decomposition, per-task
    /// worktrees, and the Merge Queue entirely. Runs one agent directly
    /// against the session branch in `self.workdir` and auto-commits
    /// whatever it changed.
    pub async fn run_quick(&self, prompt: &str) -> OrchestratorResult<bool> {
        let runner = self.runner_factory.new_runner().await.map_err(OrchestratorError::from)?;
        runner.start(prompt, &self.workdir).await.map_err(OrchestratorError::from)?;
        let result = runner.wait().await.map_err(OrchestratorError::from)?;

        if !result.success || !result.verified {
            self.event_bus
                .emit(EventPayload::TaskFailed {
                    task_id: TaskId::new(),
                    error: "quick executor did not produce a verified result".to_string(),
                })
                .await;
            self.event_bus.emit(EventPayload::SessionDone { success: false }).await;
            return Ok(false);
        }

        let status = self.git.status(&self.workdir).await.map_err(OrchestratorError::from)?;
        if !status.trim().is_empty() {
            self.git
                .exec(&self.workdir, &["add", "-A"])
                .await
                .map_err(OrchestratorError::from)?;
            self.git
                .exec(&self.workdir, &["commit", "-m", "quick mode: auto-committed changes"])
                .await
                .map_err(OrchestratorError::from)?;
        }

        self.event_bus.emit(EventPayload::SessionDone { success: true }).await;
        Ok(true)
    }

    async fn await_progress_or_idle(&self) {
        let notified = self.progress.notified();
        tokio::select! {
            () = notified => {}
            () = tokio::time::sleep(std::time::Duration::from_millis(50)) => {}
        }
    }

    /// Runs a single task's agent, routes its output through the merge
    /// queue, and applies the resulting [`TaskOutcome`] to the graph.
    fn dispatch(&self, task: Task) -> impl std::future::Future<Output = ()> + Send + 'static {
        let graph = self.graph.clone();
        let event_bus = self.event_bus.clone();
        let runner_factory = self.runner_factory.clone();
        let worktree_manager = self.worktree_manager.clone();
        let merge_queue = self.merge_queue.clone();
        let escalation = self.escalation.clone();
        let workdir = self.workdir.clone();
        let session_id = self.session_id.clone();
        let session_branch = self.session_branch.clone();
        let aborted = self.aborted.clone();
        let max_retries = self.max_retries;

        async move {
            let agent_id = task.id.to_string();
            let branch_name = format!("agent-{agent_id}");
            let worktree_path = format!("{workdir}/.worktrees/{agent_id}");

            if let Err(err) = worktree_manager.create(&branch_name, &worktree_path).await {
                Self::handle_failure(&graph, &event_bus, &escalation, &aborted, task, err.to_string(), max_retries).await;
                return;
            }

            let outcome = Self::run_agent_and_merge(
                &runner_factory,
                &merge_queue,
                &task,
                &agent_id,
                &branch_name,
                &worktree_path,
                &session_id,
                &session_branch,
            )
            .await;

            let _ = worktree_manager.remove(&worktree_path).await;

            match outcome {
                Ok(()) => {
                    graph.set_status(task.id, TaskStatus::Done).await.ok();
                    event_bus.emit(EventPayload::TaskCompleted { task_id: task.id }).await;
                }
                Err(reason) => {
                    Self::handle_failure(&graph, &event_bus, &escalation, &aborted, task, reason, max_retries).await;
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_agent_and_merge(
        runner_factory: &Arc<dyn RunnerFactory>,
        merge_queue: &Arc<MergeQueue>,
        task: &Task,
        agent_id: &str,
        branch_name: &str,
        worktree_path: &str,
        session_id: &str,
        session_branch: &str,
    ) -> Result<(), String> {
        let runner = runner_factory.new_runner().await.map_err(|e| e.to_string())?;
        runner
            .start(&task.description, worktree_path)
            .await
            .map_err(|e| e.to_string())?;
        let execution_result = runner.wait().await.map_err(|e| e.to_string())?;

        if !execution_result.success || !execution_result.verified {
            return Err("agent did not produce a verified result".to_string());
        }

        let (request, result_rx, _cancellation) =
            MergeRequest::new(task.id, agent_id, branch_name, execution_result);
        merge_queue
            .enqueue(QueuedMerge {
                request,
                workdir: worktree_path.to_string(),
                session_id: session_id.to_string(),
                session_branch: session_branch.to_string(),
            })
            .await
            .map_err(|e| e.to_string())?;

        let merge_outcome = result_rx.await.map_err(|_| "merge worker dropped the result channel".to_string())?;
        if merge_outcome.success {
            Ok(())
        } else {
            Err(merge_outcome
                .error
                .or(merge_outcome.reason)
                .unwrap_or_else(|| "merge failed".to_string()))
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn handle_failure(
        graph: &TaskGraph,
        event_bus: &Arc<EventBus>,
        escalation: &Arc<EscalationHandler>,
        aborted: &Arc<AtomicBool>,
        task: Task,
        reason: String,
        max_retries: u32,
    ) {
        let attempts = graph.record_attempt(task.id).await.unwrap_or(task.execution_count + 1);

        if attempts < max_retries {
            graph.set_status(task.id, TaskStatus::Pending).await.ok();
            event_bus
                .emit(EventPayload::TaskRetry {
                    task_id: task.id,
                    attempt: attempts,
                })
                .await;
            return;
        }

        let request = EscalationRequest::new(task.id, reason.clone(), attempts);
        let action = escalation.escalate(request).await.unwrap_or(EscalationAction::Abort);

        match action {
            EscalationAction::Retry => {
                // spec.md §4.9 retry: fresh attempt budget, not just `pending`.
                graph.reset_for_retry(task.id).await.ok();
            }
            EscalationAction::Skip => {
                graph.block(task.id, "escalation_skipped").await.ok();
            }
            EscalationAction::ManualFix => {
                // spec.md §4.9 manual_fix: pending a second confirmation from
                // the user, not a terminal `blocked` state.
                graph.set_status(task.id, TaskStatus::Pending).await.ok();
            }
            EscalationAction::Abort => {
                graph.set_status(task.id, TaskStatus::Failed).await.ok();
                aborted.store(true, Ordering::SeqCst);
                event_bus
                    .emit(EventPayload::TaskFailed { task_id: task.id, error: reason })
                    .await;
            }
        }
    }
}
