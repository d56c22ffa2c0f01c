//! Pool: multiplexes several concurrent orchestration sessions behind one
//! event stream and stats snapshot (spec.md §9 ambient addition — a real
//! deployment runs more than one session at a time).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::domain::errors::{OrchestratorError, OrchestratorResult};
use crate::domain::event::Event;
use crate::domain::ports::{GitRunner, RunnerFactory, WorktreeManager};
use crate::domain::task::Task;

use super::config::OrchestratorConfig;
use super::orchestrator::{Orchestrator, OrchestratorDeps};

/// Snapshot of pool-wide activity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoolStats {
    pub sessions_submitted: u64,
    pub sessions_running: u64,
    pub sessions_succeeded: u64,
    pub sessions_failed: u64,
}

struct SessionHandle {
    join: tokio::task::JoinHandle<OrchestratorResult<bool>>,
}

/// Owns a dynamic set of [`Orchestrator`] sessions, forwarding every
/// session's events onto one pool-wide channel.
pub struct Pool {
    sessions: RwLock<HashMap<Uuid, SessionHandle>>,
    event_tx: mpsc::Sender<Event>,
    event_rx: tokio::sync::Mutex<Option<mpsc::Receiver<Event>>>,
    submitted: Arc<AtomicU64>,
    succeeded: Arc<AtomicU64>,
    failed: Arc<AtomicU64>,
}

impl Pool {
    pub fn new(event_channel_capacity: usize) -> Self {
        let (event_tx, event_rx) = mpsc::channel(event_channel_capacity);
        Self {
            sessions: RwLock::new(HashMap::new()),
            event_tx,
            event_rx: tokio::sync::Mutex::new(Some(event_rx)),
            submitted: Arc::new(AtomicU64::new(0)),
            succeeded: Arc::new(AtomicU64::new(0)),
            failed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Takes the pool-wide event receiver. May only be called once; later
    /// callers get `None`.
    pub async fn take_events(&self) -> Option<mpsc::Receiver<Event>> {
        self.event_rx.lock().await.take()
    }

    /// Builds an orchestrator for `tasks`, starts its run loop in the
    /// background, and forwards its events onto the pool channel.
    pub async fn submit(
        &self,
        config: OrchestratorConfig,
        runner_factory: Arc<dyn RunnerFactory>,
        worktree_manager: Arc<dyn WorktreeManager>,
        git: Arc<dyn GitRunner>,
        workdir: impl Into<String>,
        tasks: Vec<Task>,
    ) -> OrchestratorResult<Uuid> {
        let session_id = Uuid::new_v4();
        let orchestrator = Arc::new(Orchestrator::new(
            &config,
            OrchestratorDeps {
                runner_factory,
                worktree_manager,
                git,
            },
            workdir,
            session_id.to_string(),
        ));

        for task in tasks {
            orchestrator.add_task(task).await?;
        }

        let mut forwarded = orchestrator.subscribe().await;
        let event_tx = self.event_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = forwarded.recv().await {
                if event_tx.send(event).await.is_err() {
                    break;
                }
            }
        });

        self.submitted.fetch_add(1, Ordering::SeqCst);
        let succeeded = self.succeeded.clone();
        let failed = self.failed.clone();
        let run_orchestrator = orchestrator.clone();
        let join = tokio::spawn(async move {
            let result = run_orchestrator.run().await;
            match &result {
                Ok(true) => {
                    succeeded.fetch_add(1, Ordering::SeqCst);
                }
                _ => {
                    failed.fetch_add(1, Ordering::SeqCst);
                }
            }
            result
        });

        self.sessions.write().await.insert(session_id, SessionHandle { join });
        Ok(session_id)
    }

    /// Cancels every session's join handle. Sessions are cooperative
    /// (spec.md §5) so this is a best-effort stop, not a guarantee the
    /// underlying agent processes terminate immediately.
    pub async fn stop(&self) {
        let mut sessions = self.sessions.write().await;
        for (_, handle) in sessions.drain() {
            handle.join.abort();
        }
    }

    pub async fn stats(&self) -> PoolStats {
        PoolStats {
            sessions_submitted: self.submitted.load(Ordering::SeqCst),
            sessions_running: self.sessions.read().await.len() as u64,
            sessions_succeeded: self.succeeded.load(Ordering::SeqCst),
            sessions_failed: self.failed.load(Ordering::SeqCst),
        }
    }

    pub async fn await_session(&self, session_id: Uuid) -> OrchestratorResult<bool> {
        let handle = self
            .sessions
            .write()
            .await
            .remove(&session_id)
            .ok_or_else(|| OrchestratorError::ValidationFailed(format!("unknown session {session_id}")))?;
        handle.join.await.map_err(OrchestratorError::from)?
    }
}
