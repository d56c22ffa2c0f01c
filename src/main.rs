//! Demonstration binary for the orchestration kernel library.
//!
//! Wires the kernel against minimal concrete collaborator implementations
//! (a real `git` subprocess runner, an in-memory worktree stub, and a
//! no-op agent runner) and runs a single-task session to completion,
//! printing the events it emits. Production deployments own their agent
//! and worktree adapters; this binary exists to exercise the wiring, not
//! to replace them.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use tokio::sync::mpsc;

use orchestrator_kernel::domain::errors::PortError;
use orchestrator_kernel::domain::execution::{ExecutionResult, LoopExitReason};
use orchestrator_kernel::domain::ports::{
    AgentRunner, GitCommandOutput, GitRunner, RunnerFactory, RunnerOptions, WorktreeInfo, WorktreeManager,
};
use orchestrator_kernel::domain::task::Task;
use orchestrator_kernel::infrastructure::logging;
use orchestrator_kernel::services::{Orchestrator, OrchestratorConfig, OrchestratorDeps};

#[derive(Parser, Debug)]
#[command(name = "orchestrator-kernel", about = "Run a demonstration orchestration session")]
struct Args {
    /// Path to a YAML config file layered over compiled-in defaults.
    #[arg(long, default_value = "orchestrator.yaml")]
    config: String,

    /// Git repository the session operates against.
    #[arg(long, default_value = ".")]
    workdir: String,

    /// Free-text description for the single demonstration task.
    #[arg(long, default_value = "demonstrate the orchestration kernel wiring")]
    task: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let _log_guard = logging::init().context("failed to initialize logging")?;

    let config = OrchestratorConfig::load(&args.config).unwrap_or_else(|err| {
        tracing::warn!(error = %err, "falling back to default configuration");
        OrchestratorConfig::default()
    });

    let deps = OrchestratorDeps {
        runner_factory: Arc::new(NullRunnerFactory),
        worktree_manager: Arc::new(InMemoryWorktreeManager),
        git: Arc::new(ProcessGitRunner),
    };

    let orchestrator = Orchestrator::new(&config, deps, args.workdir.clone(), "demo-session");
    orchestrator.add_task(Task::new("demo", args.task)).await?;

    let mut events = orchestrator.subscribe().await;
    let forwarder = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            tracing::info!(sequence = event.sequence.0, variant = event.payload.variant_name(), "event");
        }
    });

    let success = orchestrator.run().await?;
    forwarder.abort();

    tracing::info!(success, "session finished");
    Ok(())
}

/// Shells out to the system `git` binary for every [`GitRunner`] call.
struct ProcessGitRunner;

#[async_trait]
impl GitRunner for ProcessGitRunner {
    async fn status(&self, cwd: &str) -> Result<String, PortError> {
        let out = run_git(cwd, &["status", "--porcelain"]).await?;
        Ok(out.stdout)
    }

    async fn show_file(&self, cwd: &str, git_ref: &str, path: &str) -> Result<String, PortError> {
        let spec = format!("{git_ref}:{path}");
        let out = run_git(cwd, &["show", &spec]).await?;
        Ok(out.stdout)
    }

    async fn exec(&self, cwd: &str, args: &[&str]) -> Result<GitCommandOutput, PortError> {
        run_git(cwd, args).await
    }
}

async fn run_git(cwd: &str, args: &[&str]) -> Result<GitCommandOutput, PortError> {
    let output = tokio::process::Command::new("git")
        .args(args)
        .current_dir(cwd)
        .output()
        .await
        .map_err(|err| PortError::GitFailed(err.to_string()))?;
    Ok(GitCommandOutput {
        success: output.status.success(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Records worktree lifecycle calls without touching the filesystem; a
/// real deployment backs this with `git worktree add`/`remove`.
struct InMemoryWorktreeManager;

#[async_trait]
impl WorktreeManager for InMemoryWorktreeManager {
    async fn create(&self, branch: &str, path: &str) -> Result<(), PortError> {
        tracing::debug!(branch, path, "worktree create (stub)");
        Ok(())
    }
    async fn remove(&self, path: &str) -> Result<(), PortError> {
        tracing::debug!(path, "worktree remove (stub)");
        Ok(())
    }
    async fn list(&self) -> Result<Vec<WorktreeInfo>, PortError> {
        Ok(Vec::new())
    }
    async fn prune(&self) -> Result<(), PortError> {
        Ok(())
    }
}

/// Returns a fixed successful, verified result immediately; a real
/// deployment backs this with the actual coding-agent subprocess.
struct NullAgentRunner;

#[async_trait]
impl AgentRunner for NullAgentRunner {
    async fn start(&self, prompt: &str, cwd: &str) -> Result<(), PortError> {
        tracing::debug!(prompt, cwd, "agent start (stub)");
        Ok(())
    }

    async fn start_with_options(&self, prompt: &str, cwd: &str, _options: RunnerOptions) -> Result<(), PortError> {
        self.start(prompt, cwd).await
    }

    fn output(&self) -> mpsc::Receiver<String> {
        mpsc::channel(1).1
    }

    async fn wait(&self) -> Result<ExecutionResult, PortError> {
        Ok(ExecutionResult {
            success: true,
            verified: true,
            output: "stub agent completed".into(),
            worktree_path: String::new(),
            agent_id: "stub-agent".into(),
            branch_name: String::new(),
            tokens: 0,
            duration: std::time::Duration::from_millis(1),
            loop_iterations: 1,
            loop_exit_reason: LoopExitReason::Completed,
            log_file: None,
        })
    }

    async fn kill(&self) -> Result<(), PortError> {
        Ok(())
    }
}

struct NullRunnerFactory;

#[async_trait]
impl RunnerFactory for NullRunnerFactory {
    async fn new_runner(&self) -> Result<Box<dyn AgentRunner>, PortError> {
        Ok(Box::new(NullAgentRunner))
    }
}
