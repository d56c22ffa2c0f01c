//! Escalation Handler: pauses the scheduler and waits on a human decision
//! when a task exhausts retries or a merge cannot be resolved (spec.md
//! §4.9).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::{oneshot, RwLock};
use uuid::Uuid;

use crate::domain::errors::EscalationError;
use crate::domain::event::EventPayload;
use crate::domain::merge::{EscalationAction, EscalationRequest, EscalationResponse};
use crate::domain::task::TaskId;

use super::event_bus::EventBus;
use super::pause_control::PauseControl;
use super::task_graph::TaskGraph;

pub struct EscalationHandler {
    event_bus: Arc<EventBus>,
    pause_control: PauseControl,
    graph: TaskGraph,
    deadline: Duration,
    active: RwLock<HashSet<TaskId>>,
    pending: RwLock<HashMap<Uuid, oneshot::Sender<EscalationResponse>>>,
}

impl EscalationHandler {
    pub fn new(event_bus: Arc<EventBus>, pause_control: PauseControl, graph: TaskGraph, deadline: Duration) -> Self {
        Self {
            event_bus,
            pause_control,
            graph,
            deadline,
            active: RwLock::new(HashSet::new()),
            pending: RwLock::new(HashMap::new()),
        }
    }

    /// Delivers a user decision for an in-flight escalation, identified by
    /// [`EscalationRequest::id`]. Errors if no escalation with that id is
    /// currently awaiting a response (already decided, or unknown).
    pub async fn respond(&self, response: EscalationResponse) -> Result<(), EscalationError> {
        let sender = self.pending.write().await.remove(&response.request_id);
        match sender {
            Some(sender) => sender.send(response).map_err(|_| EscalationError::TimedOut),
            None => Err(EscalationError::TimedOut),
        }
    }

    /// Raises an escalation for `task_id`, pausing the scheduler for the
    /// duration of the wait. Only one escalation per task may be in flight
    /// at a time (spec.md §4.9 step 1). Defaults to [`EscalationAction::Abort`]
    /// if no response arrives before the configured deadline.
    pub async fn escalate(&self, request: EscalationRequest) -> Result<EscalationAction, EscalationError> {
        let task_id = request.task_id;
        {
            let mut active = self.active.write().await;
            if !active.insert(task_id) {
                return Err(EscalationError::AlreadyActive(task_id));
            }
        }

        self.pause_control.pause();
        let (tx, rx) = oneshot::channel();
        self.pending.write().await.insert(request.id, tx);

        self.event_bus
            .emit(EventPayload::TaskEscalation {
                task_id,
                escalation_id: request.id,
                attempt_count: request.attempt_count,
                failure_reason: request.failure_reason.clone(),
                validation_summary: request.validation_summary.clone(),
                worktree_path: request.worktree_path.clone(),
            })
            .await;

        let decision = match tokio::time::timeout(self.deadline, rx).await {
            Ok(Ok(response)) => response.action,
            Ok(Err(_)) | Err(_) => {
                self.pending.write().await.remove(&request.id);
                EscalationAction::Abort
            }
        };

        self.apply(task_id, decision, &request).await;

        self.active.write().await.remove(&task_id);
        self.pause_control.resume();

        Ok(decision)
    }

    async fn apply(&self, task_id: TaskId, action: EscalationAction, request: &EscalationRequest) {
        match action {
            EscalationAction::Retry => {
                self.event_bus
                    .emit(EventPayload::TaskRetry {
                        task_id,
                        attempt: request.attempt_count,
                    })
                    .await;
            }
            EscalationAction::Skip => {
                self.event_bus
                    .emit(EventPayload::TaskSkipped {
                        task_id,
                        reason: request.failure_reason.clone(),
                    })
                    .await;
                let blocked = self.graph.block_dependents_transitively(task_id).await;
                for dependent in blocked {
                    self.event_bus
                        .emit(EventPayload::TaskBlocked {
                            task_id: dependent,
                            reason: format!("dependency_skipped:{task_id}"),
                        })
                        .await;
                }
            }
            EscalationAction::Abort => {
                self.event_bus
                    .emit(EventPayload::Abort {
                        reason: format!("task {task_id} escalation resolved to abort"),
                    })
                    .await;
            }
            EscalationAction::ManualFix => {
                let worktree_path = request.worktree_path.clone().unwrap_or_default();
                self.event_bus
                    .emit(EventPayload::ManualFixRequired { task_id, worktree_path })
                    .await;
            }
        }
    }

    /// Structured metadata attached to an escalation event for observers
    /// that want more than the typed payload fields (spec.md §4.9).
    pub fn metadata(request: &EscalationRequest) -> serde_json::Value {
        json!({
            "escalation_id": request.id,
            "task_id": request.task_id.0,
            "attempt_count": request.attempt_count,
            "created_at": request.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::task::Task;

    fn handler() -> (EscalationHandler, TaskId) {
        let event_bus = Arc::new(EventBus::new(8));
        let pause_control = PauseControl::default();
        let graph = TaskGraph::default();
        let handler = EscalationHandler::new(event_bus, pause_control, graph, Duration::from_millis(50));
        (handler, TaskId::new())
    }

    #[tokio::test]
    async fn escalation_defaults_to_abort_on_timeout() {
        let (handler, task_id) = handler();
        let request = EscalationRequest::new(task_id, "agent crashed", 3);
        let action = handler.escalate(request).await.unwrap();
        assert_eq!(action, EscalationAction::Abort);
        assert!(!handler.pause_control.is_paused());
    }

    #[tokio::test]
    async fn concurrent_escalation_for_same_task_is_rejected() {
        let event_bus = Arc::new(EventBus::new(8));
        let pause_control = PauseControl::default();
        let graph = TaskGraph::default();
        let handler = Arc::new(EscalationHandler::new(event_bus, pause_control, graph, Duration::from_secs(5)));
        let task_id = TaskId::new();

        let first_request = EscalationRequest::new(task_id, "first", 3);
        let first_request_id = first_request.id;
        let first_handler = handler.clone();
        let first = tokio::spawn(async move { first_handler.escalate(first_request).await });

        tokio::task::yield_now().await;

        let second_request = EscalationRequest::new(task_id, "second", 3);
        let second = handler.escalate(second_request).await;
        assert!(matches!(second, Err(EscalationError::AlreadyActive(_))));

        handler
            .respond(EscalationResponse::new(first_request_id, EscalationAction::Abort))
            .await
            .unwrap();
        let action = first.await.unwrap().unwrap();
        assert_eq!(action, EscalationAction::Abort);
    }

    #[tokio::test]
    async fn retry_decision_does_not_block_dependents() {
        let event_bus = Arc::new(EventBus::new(8));
        let pause_control = PauseControl::default();
        let graph = TaskGraph::default();
        let task = Task::new("t1", "desc");
        let task_id = task.id;
        graph.add_task(task).await.unwrap();

        let handler = Arc::new(EscalationHandler::new(event_bus, pause_control, graph.clone(), Duration::from_secs(5)));
        let request = EscalationRequest::new(task_id, "transient", 2);
        let request_id = request.id;

        let handler_clone = handler.clone();
        let escalate = tokio::spawn(async move { handler_clone.escalate(request).await });
        tokio::task::yield_now().await;
        handler
            .respond(EscalationResponse::new(request_id, EscalationAction::Retry))
            .await
            .unwrap();

        let action = escalate.await.unwrap().unwrap();
        assert_eq!(action, EscalationAction::Retry);
    }
}
