//! End-to-end session scenarios assembled from the public `Orchestrator`
//! facade, covering spec.md §8's parallelism, merge-conflict fallback, and
//! escalation behaviors against stub collaborators.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use orchestrator_kernel::domain::errors::PortError;
use orchestrator_kernel::domain::execution::{ExecutionResult, LoopExitReason};
use orchestrator_kernel::domain::merge::{EscalationAction, EscalationResponse};
use orchestrator_kernel::domain::ports::{
    AgentRunner, GitCommandOutput, GitRunner, RunnerFactory, RunnerOptions, WorktreeInfo, WorktreeManager,
};
use orchestrator_kernel::domain::task::{Task, TaskStatus};
use orchestrator_kernel::{EventPayload, Orchestrator, OrchestratorConfig, OrchestratorDeps};

struct SucceedingRunner;

#[async_trait]
impl AgentRunner for SucceedingRunner {
    async fn start(&self, _prompt: &str, _cwd: &str) -> Result<(), PortError> {
        Ok(())
    }
    async fn start_with_options(&self, _p: &str, _c: &str, _o: RunnerOptions) -> Result<(), PortError> {
        Ok(())
    }
    fn output(&self) -> mpsc::Receiver<String> {
        mpsc::channel(1).1
    }
    async fn wait(&self) -> Result<ExecutionResult, PortError> {
        Ok(ExecutionResult {
            success: true,
            verified: true,
            output: String::new(),
            worktree_path: "/repo".into(),
            agent_id: "a".into(),
            branch_name: "agent-1".into(),
            tokens: 0,
            duration: Duration::from_millis(5),
            loop_iterations: 1,
            loop_exit_reason: LoopExitReason::Completed,
            log_file: None,
        })
    }
    async fn kill(&self) -> Result<(), PortError> {
        Ok(())
    }
}

struct SucceedingFactory;

#[async_trait]
impl RunnerFactory for SucceedingFactory {
    async fn new_runner(&self) -> Result<Box<dyn AgentRunner>, PortError> {
        Ok(Box::new(SucceedingRunner))
    }
}

/// Always reports failure; used to drive a task through its retry budget
/// into escalation.
struct FailingRunner;

#[async_trait]
impl AgentRunner for FailingRunner {
    async fn start(&self, _prompt: &str, _cwd: &str) -> Result<(), PortError> {
        Ok(())
    }
    async fn start_with_options(&self, _p: &str, _c: &str, _o: RunnerOptions) -> Result<(), PortError> {
        Ok(())
    }
    fn output(&self) -> mpsc::Receiver<String> {
        mpsc::channel(1).1
    }
    async fn wait(&self) -> Result<ExecutionResult, PortError> {
        Ok(ExecutionResult {
            success: false,
            verified: false,
            output: "agent crashed".into(),
            worktree_path: "/repo".into(),
            agent_id: "a".into(),
            branch_name: "agent-1".into(),
            tokens: 0,
            duration: Duration::from_millis(5),
            loop_iterations: 1,
            loop_exit_reason: LoopExitReason::MaxIterationsReached,
            log_file: None,
        })
    }
    async fn kill(&self) -> Result<(), PortError> {
        Ok(())
    }
}

struct FailingFactory;

#[async_trait]
impl RunnerFactory for FailingFactory {
    async fn new_runner(&self) -> Result<Box<dyn AgentRunner>, PortError> {
        Ok(Box::new(FailingRunner))
    }
}

struct NoopWorktrees;

#[async_trait]
impl WorktreeManager for NoopWorktrees {
    async fn create(&self, _branch: &str, _path: &str) -> Result<(), PortError> {
        Ok(())
    }
    async fn remove(&self, _path: &str) -> Result<(), PortError> {
        Ok(())
    }
    async fn list(&self) -> Result<Vec<WorktreeInfo>, PortError> {
        Ok(Vec::new())
    }
    async fn prune(&self) -> Result<(), PortError> {
        Ok(())
    }
}

/// Reports a clean merge-tree and successful merge for every branch pair.
struct CleanGit;

#[async_trait]
impl GitRunner for CleanGit {
    async fn status(&self, _cwd: &str) -> Result<String, PortError> {
        Ok(String::new())
    }
    async fn show_file(&self, _cwd: &str, _git_ref: &str, _path: &str) -> Result<String, PortError> {
        Ok(String::new())
    }
    async fn exec(&self, _cwd: &str, args: &[&str]) -> Result<GitCommandOutput, PortError> {
        let stdout = match args.first().copied() {
            Some("rev-parse") => "deadbeef\n".into(),
            _ => String::new(),
        };
        Ok(GitCommandOutput {
            success: true,
            stdout,
            stderr: String::new(),
        })
    }
}

/// Reports an unresolvable conflict on every merge attempt: `merge-tree`
/// always shows conflict markers, direct merge and rebase always fail, and
/// `status` always reports unmerged paths so the Merge Resolver Agent's
/// validation never passes. Used to drive the merge pipeline through its
/// full fallback chain to a rolled-back failure.
struct AlwaysConflictingGit;

#[async_trait]
impl GitRunner for AlwaysConflictingGit {
    async fn status(&self, _cwd: &str) -> Result<String, PortError> {
        Ok("Unmerged paths:\n\tboth modified:   src/a.rs\n".into())
    }
    async fn show_file(&self, _cwd: &str, _git_ref: &str, _path: &str) -> Result<String, PortError> {
        Ok(String::new())
    }
    async fn exec(&self, _cwd: &str, args: &[&str]) -> Result<GitCommandOutput, PortError> {
        let out = |success: bool, stdout: &str| GitCommandOutput {
            success,
            stdout: stdout.to_string(),
            stderr: String::new(),
        };
        match args.first().copied() {
            Some("rev-parse") => Ok(out(true, "deadbeef\n")),
            Some("merge-tree") => Ok(out(
                true,
                "<<<<<<< HEAD\n+++ b/src/a.rs\n=======\n+++ a/src/a.rs\n>>>>>>> agent\n",
            )),
            // Both diffs touch the same file and function, so the Semantic
            // Auto-Merger's disjointness check rejects the pair and the
            // pipeline falls straight through to the resolver agent.
            Some("diff") => Ok(out(
                true,
                "diff --git a/src/a.rs b/src/a.rs\n@@ -1,3 +1,3 @@ fn alpha() {\n+let x = 1;\n",
            )),
            Some("merge") => Ok(out(false, "")),
            Some("rebase") => Ok(out(false, "")),
            Some("checkout") => Ok(out(true, "")),
            Some("reset") => Ok(out(true, "")),
            _ => Ok(out(true, "")),
        }
    }
}

fn conflict_config() -> OrchestratorConfig {
    OrchestratorConfig {
        max_agents: 1,
        event_bus_capacity: 32,
        merge_queue_capacity: 8,
        max_retries: 3,
        max_resolver_attempts: 1,
        rebase_retry_limit: 1,
        escalation_deadline_secs: 1,
        ..Default::default()
    }
}

#[tokio::test]
async fn independent_tasks_run_in_parallel_and_session_succeeds() {
    let config = OrchestratorConfig {
        max_agents: 2,
        ..Default::default()
    };
    let deps = OrchestratorDeps {
        runner_factory: Arc::new(SucceedingFactory),
        worktree_manager: Arc::new(NoopWorktrees),
        git: Arc::new(CleanGit),
    };
    let orchestrator = Orchestrator::new(&config, deps, "/repo", "sess-parallel");
    orchestrator.add_task(Task::new("a", "do a")).await.unwrap();
    orchestrator.add_task(Task::new("b", "do b")).await.unwrap();

    let success = orchestrator.run().await.unwrap();
    assert!(success);
}

#[tokio::test]
async fn linear_chain_runs_dependency_before_dependent() {
    let config = OrchestratorConfig {
        max_agents: 2,
        ..Default::default()
    };
    let deps = OrchestratorDeps {
        runner_factory: Arc::new(SucceedingFactory),
        worktree_manager: Arc::new(NoopWorktrees),
        git: Arc::new(CleanGit),
    };
    let orchestrator = Orchestrator::new(&config, deps, "/repo", "sess-chain");

    let a = Task::new("a", "do a");
    let a_id = a.id;
    orchestrator.add_task(a).await.unwrap();
    orchestrator
        .add_task(Task::new("b", "do b").with_dependencies(vec![a_id]))
        .await
        .unwrap();

    let mut events = orchestrator.subscribe().await;
    let order: Arc<tokio::sync::Mutex<Vec<&'static str>>> = Arc::new(tokio::sync::Mutex::new(Vec::new()));
    let order_rx = order.clone();
    let watcher = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if matches!(event.payload, EventPayload::TaskCompleted { .. }) {
                order_rx.lock().await.push("completed");
            }
        }
    });

    let success = orchestrator.run().await.unwrap();
    watcher.abort();

    assert!(success);
    assert_eq!(order.lock().await.len(), 2);
}

/// spec.md §8: an unresolvable merge conflict exhausts the Branch Merger,
/// Semantic Auto-Merger (skipped, diffs overlap), and Merge Resolver Agent
/// in turn; the task retries its full budget, escalates, and — with no
/// responder — the escalation deadline defaults to `Abort`, failing the
/// session.
#[tokio::test]
async fn unresolvable_conflict_exhausts_retries_and_aborts_session() {
    let config = conflict_config();
    let deps = OrchestratorDeps {
        runner_factory: Arc::new(SucceedingFactory),
        worktree_manager: Arc::new(NoopWorktrees),
        git: Arc::new(AlwaysConflictingGit),
    };
    let orchestrator = Orchestrator::new(&config, deps, "/repo", "sess-conflict");
    orchestrator.add_task(Task::new("a", "touch a.rs")).await.unwrap();

    let mut events = orchestrator.subscribe().await;
    let saw_escalation = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let saw_escalation_rx = saw_escalation.clone();
    let watcher = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if matches!(event.payload, EventPayload::TaskEscalation { .. }) {
                saw_escalation_rx.store(true, Ordering::SeqCst);
            }
        }
    });

    let success = orchestrator.run().await.unwrap();
    watcher.abort();

    assert!(!success);
    assert!(saw_escalation.load(Ordering::SeqCst));
}

/// Same setup as above, but an external responder answers the escalation
/// with `Skip` before the deadline — the task is marked `Blocked` with
/// reason `escalation_skipped` (spec.md §4.9, §8 scenario 5) and the
/// session still reports failure since no task reached `Done`, without ever
/// timing out to the default `Abort`.
#[tokio::test]
async fn responding_skip_before_deadline_avoids_default_abort() {
    let mut config = conflict_config();
    config.escalation_deadline_secs = 5;
    let deps = OrchestratorDeps {
        runner_factory: Arc::new(SucceedingFactory),
        worktree_manager: Arc::new(NoopWorktrees),
        git: Arc::new(AlwaysConflictingGit),
    };
    let orchestrator = Arc::new(Orchestrator::new(&config, deps, "/repo", "sess-skip"));
    let task = Task::new("a", "touch a.rs");
    let task_id = task.id;
    orchestrator.add_task(task).await.unwrap();

    let mut events = orchestrator.subscribe().await;
    let responder_orchestrator = orchestrator.clone();
    let responder = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let EventPayload::TaskEscalation { escalation_id, .. } = event.payload {
                let response = EscalationResponse::new(escalation_id, EscalationAction::Skip);
                responder_orchestrator.respond_to_escalation(response).await.ok();
                break;
            }
        }
    });

    let success = orchestrator.run().await.unwrap();
    responder.abort();

    assert!(!success);
    let task = orchestrator.task(task_id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Blocked);
    assert_eq!(task.blocked_reason.as_deref(), Some("escalation_skipped"));
}

/// A session with no tasks submitted at all is rejected up front rather
/// than silently reporting success.
#[tokio::test]
async fn run_rejects_a_session_with_no_tasks_submitted() {
    let config = OrchestratorConfig::default();
    let deps = OrchestratorDeps {
        runner_factory: Arc::new(SucceedingFactory),
        worktree_manager: Arc::new(NoopWorktrees),
        git: Arc::new(CleanGit),
    };
    let orchestrator = Orchestrator::new(&config, deps, "/repo", "sess-empty");

    let result = orchestrator.run().await;
    assert!(result.is_err());
}

#[tokio::test]
async fn failing_runner_retries_up_to_budget_then_escalates() {
    let mut config = conflict_config();
    config.escalation_deadline_secs = 1;
    let deps = OrchestratorDeps {
        runner_factory: Arc::new(FailingFactory),
        worktree_manager: Arc::new(NoopWorktrees),
        git: Arc::new(CleanGit),
    };
    let orchestrator = Orchestrator::new(&config, deps, "/repo", "sess-retry-budget");
    orchestrator.add_task(Task::new("a", "always fails")).await.unwrap();

    let mut events = orchestrator.subscribe().await;
    let retries = Arc::new(AtomicUsize::new(0));
    let retries_rx = retries.clone();
    let watcher = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if matches!(event.payload, EventPayload::TaskRetry { .. }) {
                retries_rx.fetch_add(1, Ordering::SeqCst);
            }
        }
    });

    let success = orchestrator.run().await.unwrap();
    watcher.abort();

    assert!(!success);
    // MAX_RETRIES is 3: two retries are granted (attempts 1, 2) before the
    // third failure escalates instead of retrying again.
    assert_eq!(retries.load(Ordering::SeqCst), 2);
}
