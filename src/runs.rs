//! Run lifecycle: enqueue, claim, complete and cancel.
//!
//! Every transition is a conditional write in the store, so concurrent API
//! handlers and workers never need a lock of their own.

use chrono::Utc;
use tracing::{info, instrument, warn};

use crate::db::{is_unique_violation, Database, Run, RunStatus};
use crate::error::CoordinatorError;
use crate::{CANCELLED_MESSAGE, TARGET_WORKER};

#[derive(Clone)]
pub struct RunCoordinator {
    db: Database,
}

impl RunCoordinator {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Queues a refresh for `client_id`.
    ///
    /// If the client already has a QUEUED or RUNNING run, nothing is inserted
    /// and the existing run's id comes back as a conflict.
    #[instrument(target = "worker", level = "info", skip(self))]
    pub async fn enqueue(&self, client_id: &str) -> Result<Run, CoordinatorError> {
        let client = self
            .db
            .get_client(client_id)
            .await?
            .ok_or_else(|| CoordinatorError::Validation("Client not found".to_string()))?;

        if let Some(existing) = self.db.active_run_for_client(&client.id).await? {
            info!(target: TARGET_WORKER, "Client {} already has active run {}", client.id, existing.id);
            return Err(CoordinatorError::Conflict {
                run_id: existing.id,
            });
        }

        match self.db.insert_queued_run(&client.org_id, &client.id).await {
            Ok(run) => {
                info!(target: TARGET_WORKER, "Queued run {} for client {}", run.id, client.id);
                Ok(run)
            }
            // Lost an enqueue race; report the winner.
            Err(err) if is_unique_violation(&err) => match self.db.active_run_for_client(&client.id).await? {
                Some(existing) => Err(CoordinatorError::Conflict {
                    run_id: existing.id,
                }),
                None => Err(CoordinatorError::Store(err)),
            },
            Err(err) => Err(err.into()),
        }
    }

    /// Moves `run_id` from QUEUED to RUNNING. `false` means another worker
    /// got there first, or the run is no longer queued.
    pub async fn claim(&self, run_id: &str) -> Result<bool, CoordinatorError> {
        Ok(self.db.claim_run(run_id, Utc::now()).await?)
    }

    /// Claims the oldest QUEUED run, if any.
    pub async fn claim_next(&self) -> Result<Option<Run>, CoordinatorError> {
        let Some(run) = self.db.oldest_queued_run().await? else {
            return Ok(None);
        };

        if !self.claim(&run.id).await? {
            info!(target: TARGET_WORKER, "Run {} was claimed elsewhere", run.id);
            return Ok(None);
        }
        Ok(self.db.get_run(&run.id).await?)
    }

    /// Records a RUNNING run's outcome: SUCCESS when `error` is `None`,
    /// FAILED with the message otherwise.
    ///
    /// Returns `false` without writing anything if the run left RUNNING in the
    /// meantime, which keeps a user cancellation in place.
    #[instrument(target = "worker", level = "info", skip(self, error))]
    pub async fn complete(&self, run_id: &str, error: Option<&str>) -> Result<bool, CoordinatorError> {
        let status = if error.is_some() {
            RunStatus::Failed
        } else {
            RunStatus::Success
        };

        let written = self.db.finish_run(run_id, status, error, Utc::now()).await?;
        if written {
            info!(target: TARGET_WORKER, "Run {} finished with {}", run_id, status);
        } else {
            warn!(target: TARGET_WORKER, "Run {} was no longer RUNNING, keeping its current status", run_id);
        }
        Ok(written)
    }

    /// Forces a QUEUED or RUNNING run to FAILED with [`CANCELLED_MESSAGE`].
    #[instrument(target = "worker", level = "info", skip(self))]
    pub async fn cancel(&self, run_id: &str) -> Result<Run, CoordinatorError> {
        let run = self.status(run_id).await?;
        if !run.status.is_active() {
            return Err(CoordinatorError::NotActive);
        }

        if !self.db.fail_active_run(run_id, CANCELLED_MESSAGE, Utc::now()).await? {
            // Finished between the read and the write.
            return Err(CoordinatorError::NotActive);
        }

        info!(target: TARGET_WORKER, "Run {} cancelled", run_id);
        self.status(run_id).await
    }

    pub async fn status(&self, run_id: &str) -> Result<Run, CoordinatorError> {
        self.db
            .get_run(run_id)
            .await?
            .ok_or(CoordinatorError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn setup() -> (RunCoordinator, String) {
        let db = Database::in_memory().await.unwrap();
        let client = db.create_client("org-1", "Acme", None).await.unwrap();
        (RunCoordinator::new(db), client.id)
    }

    #[tokio::test]
    async fn test_enqueue_reports_existing_run() {
        let (coordinator, client_id) = setup().await;
        let run = coordinator.enqueue(&client_id).await.unwrap();
        assert_eq!(run.status, RunStatus::Queued);
        assert_eq!(run.org_id, "org-1");

        match coordinator.enqueue(&client_id).await {
            Err(CoordinatorError::Conflict { run_id }) => assert_eq!(run_id, run.id),
            other => panic!("expected conflict, got {:?}", other),
        }

        // Still conflicting while RUNNING.
        assert!(coordinator.claim(&run.id).await.unwrap());
        assert!(matches!(
            coordinator.enqueue(&client_id).await,
            Err(CoordinatorError::Conflict { .. })
        ));
        assert_eq!(coordinator.database().recent_runs(&client_id, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_enqueue_unknown_client_creates_nothing() {
        let (coordinator, _) = setup().await;
        assert!(matches!(
            coordinator.enqueue("missing").await,
            Err(CoordinatorError::Validation(_))
        ));
        assert!(coordinator.database().oldest_queued_run().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_claims_succeed_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("runs.db");
        let db = Database::new(path.to_str().unwrap()).await.unwrap();
        let client = db.create_client("org-1", "Acme", None).await.unwrap();
        let coordinator = RunCoordinator::new(db);
        let run = coordinator.enqueue(&client.id).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let coordinator = coordinator.clone();
            let run_id = run.id.clone();
            handles.push(tokio::spawn(async move { coordinator.claim(&run_id).await.unwrap() }));
        }

        let mut claimed = 0;
        for handle in handles {
            if handle.await.unwrap() {
                claimed += 1;
            }
        }
        assert_eq!(claimed, 1);
        assert_eq!(coordinator.status(&run.id).await.unwrap().status, RunStatus::Running);
    }

    #[tokio::test]
    async fn test_claim_next_and_complete() {
        let (coordinator, client_id) = setup().await;
        assert!(coordinator.claim_next().await.unwrap().is_none());

        let run = coordinator.enqueue(&client_id).await.unwrap();
        let claimed = coordinator.claim_next().await.unwrap().unwrap();
        assert_eq!(claimed.id, run.id);
        assert_eq!(claimed.status, RunStatus::Running);
        assert!(claimed.started_at.is_some());

        assert!(coordinator.complete(&run.id, None).await.unwrap());
        let done = coordinator.status(&run.id).await.unwrap();
        assert_eq!(done.status, RunStatus::Success);
        assert!(done.error_message.is_none());

        // Terminal runs are never overwritten.
        assert!(!coordinator.complete(&run.id, Some("late failure")).await.unwrap());
        assert_eq!(coordinator.status(&run.id).await.unwrap().status, RunStatus::Success);
    }

    #[tokio::test]
    async fn test_cancel() {
        let (coordinator, client_id) = setup().await;
        assert!(matches!(
            coordinator.cancel("missing").await,
            Err(CoordinatorError::NotFound)
        ));

        let run = coordinator.enqueue(&client_id).await.unwrap();
        let cancelled = coordinator.cancel(&run.id).await.unwrap();
        assert_eq!(cancelled.status, RunStatus::Failed);
        assert_eq!(cancelled.error_message.as_deref(), Some(CANCELLED_MESSAGE));
        assert!(cancelled.finished_at.is_some());

        assert!(matches!(
            coordinator.cancel(&run.id).await,
            Err(CoordinatorError::NotActive)
        ));

        let second = coordinator.enqueue(&client_id).await.unwrap();
        assert!(coordinator.claim(&second.id).await.unwrap());
        assert!(coordinator.complete(&second.id, None).await.unwrap());
        assert!(matches!(
            coordinator.cancel(&second.id).await,
            Err(CoordinatorError::NotActive)
        ));
    }

    #[tokio::test]
    async fn test_completion_after_cancel_keeps_cancellation() {
        let (coordinator, client_id) = setup().await;
        let run = coordinator.enqueue(&client_id).await.unwrap();
        assert!(coordinator.claim(&run.id).await.unwrap());

        coordinator.cancel(&run.id).await.unwrap();
        assert!(!coordinator.complete(&run.id, None).await.unwrap());

        let stored = coordinator.status(&run.id).await.unwrap();
        assert_eq!(stored.status, RunStatus::Failed);
        assert_eq!(stored.error_message.as_deref(), Some(CANCELLED_MESSAGE));
    }
}
