//! Checkpoint / Rollback: per-agent markers at the session-branch head,
//! used to rewind the session branch on a bad merge (spec.md §4.7).

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::domain::errors::{OrchestratorError, OrchestratorResult};
use crate::domain::merge::{Checkpoint, CheckpointVerdict};
use crate::domain::ports::GitRunner;

/// Materializes checkpoints as annotated git tags (`checkpoint/<session>/<agent>`)
/// so the commit they pin survives process restarts, while the good/bad
/// verdict — which has no natural git representation — is tracked
/// in-memory for the lifetime of the session.
pub struct CheckpointService {
    git: Arc<dyn GitRunner>,
    checkpoints: RwLock<HashMap<String, Checkpoint>>,
}

impl CheckpointService {
    pub fn new(git: Arc<dyn GitRunner>) -> Self {
        Self {
            git,
            checkpoints: RwLock::new(HashMap::new()),
        }
    }

    /// Creates a checkpoint at the current session-branch head.
    pub async fn create(
        &self,
        workdir: &str,
        session_id: &str,
        agent_id: &str,
    ) -> OrchestratorResult<Checkpoint> {
        let head = self
            .git
            .exec(workdir, &["rev-parse", "HEAD"])
            .await
            .map_err(OrchestratorError::from)?;
        let head_commit = head.stdout.trim().to_string();

        let checkpoint = Checkpoint::new(session_id, agent_id, head_commit.clone());
        let tag_name = format!("checkpoint/{}", checkpoint.name());
        let message = format!("checkpoint before merging {agent_id} into {session_id}");
        self.git
            .exec(workdir, &["tag", "-a", &tag_name, "-m", &message, &head_commit])
            .await
            .map_err(OrchestratorError::from)?;

        self.checkpoints
            .write()
            .await
            .insert(checkpoint.name(), checkpoint.clone());
        Ok(checkpoint)
    }

    pub async fn mark_good(&self, session_id: &str, agent_id: &str) {
        self.set_verdict(session_id, agent_id, CheckpointVerdict::Good).await;
    }

    pub async fn mark_bad(&self, session_id: &str, agent_id: &str) {
        self.set_verdict(session_id, agent_id, CheckpointVerdict::Bad).await;
    }

    async fn set_verdict(&self, session_id: &str, agent_id: &str, verdict: CheckpointVerdict) {
        let key = format!("{session_id}/{agent_id}");
        if let Some(checkpoint) = self.checkpoints.write().await.get_mut(&key) {
            checkpoint.verdict = verdict;
        }
    }

    /// Hard-resets the session branch to the checkpoint commit and discards
    /// the working tree.
    pub async fn rollback(&self, workdir: &str, session_id: &str, agent_id: &str) -> OrchestratorResult<()> {
        let key = format!("{session_id}/{agent_id}");
        let checkpoint = self
            .checkpoints
            .read()
            .await
            .get(&key)
            .cloned()
            .ok_or_else(|| OrchestratorError::RepoStateCorrupt(format!("no checkpoint for {key}")))?;

        let output = self
            .git
            .exec(workdir, &["reset", "--hard", &checkpoint.head_commit])
            .await
            .map_err(OrchestratorError::from)?;
        if !output.success {
            return Err(OrchestratorError::RepoStateCorrupt(format!(
                "rollback to {} failed: {}",
                checkpoint.head_commit, output.stderr
            )));
        }
        Ok(())
    }

    /// Garbage-collects every checkpoint under `session_id` on session
    /// completion, deleting their backing tags.
    pub async fn cleanup_session(&self, workdir: &str, session_id: &str) {
        let prefix = format!("{session_id}/");
        let mut checkpoints = self.checkpoints.write().await;
        let keys: Vec<String> = checkpoints
            .keys()
            .filter(|key| key.starts_with(&prefix))
            .cloned()
            .collect();
        for key in keys {
            let tag_name = format!("checkpoint/{key}");
            let _ = self.git.exec(workdir, &["tag", "-d", &tag_name]).await;
            checkpoints.remove(&key);
        }
    }
}
