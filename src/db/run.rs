use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::core::{decode_optional_time, decode_time, encode_time, Database};
use super::types::{Run, RunStatus};
use crate::TARGET_DB;

fn run_from_row(row: &SqliteRow) -> Result<Run, sqlx::Error> {
    let status: String = row.try_get("status")?;
    Ok(Run {
        id: row.try_get("id")?,
        org_id: row.try_get("org_id")?,
        client_id: row.try_get("client_id")?,
        status: status
            .parse()
            .map_err(|e: String| sqlx::Error::Decode(e.into()))?,
        started_at: decode_optional_time(row.try_get("started_at")?)?,
        finished_at: decode_optional_time(row.try_get("finished_at")?)?,
        error_message: row.try_get("error_message")?,
        created_at: decode_time(&row.try_get::<String, _>("created_at")?)?,
    })
}

impl Database {
    /// Inserts a QUEUED run. Fails with a unique violation when the client
    /// already has a QUEUED or RUNNING run.
    #[instrument(target = "db_query", level = "info", skip(self))]
    pub async fn insert_queued_run(&self, org_id: &str, client_id: &str) -> Result<Run, sqlx::Error> {
        let id = Uuid::new_v4().to_string();

        let row = sqlx::query(
            r#"
            INSERT INTO runs (id, org_id, client_id, status, created_at)
            VALUES (?1, ?2, ?3, 'QUEUED', ?4)
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(org_id)
        .bind(client_id)
        .bind(encode_time(&Utc::now()))
        .fetch_one(self.pool())
        .await?;

        debug!(target: TARGET_DB, "Queued run {} for client {}", id, client_id);
        run_from_row(&row)
    }

    pub async fn get_run(&self, run_id: &str) -> Result<Option<Run>, sqlx::Error> {
        sqlx::query("SELECT * FROM runs WHERE id = ?1")
            .bind(run_id)
            .fetch_optional(self.pool())
            .await?
            .as_ref()
            .map(run_from_row)
            .transpose()
    }

    /// The client's QUEUED or RUNNING run, if any.
    pub async fn active_run_for_client(&self, client_id: &str) -> Result<Option<Run>, sqlx::Error> {
        sqlx::query(
            r#"
            SELECT * FROM runs
            WHERE client_id = ?1 AND status IN ('QUEUED', 'RUNNING')
            ORDER BY created_at ASC
            LIMIT 1
            "#,
        )
        .bind(client_id)
        .fetch_optional(self.pool())
        .await?
        .as_ref()
        .map(run_from_row)
        .transpose()
    }

    /// Oldest QUEUED run across all clients.
    #[instrument(target = "db_query", level = "debug", skip(self))]
    pub async fn oldest_queued_run(&self) -> Result<Option<Run>, sqlx::Error> {
        sqlx::query(
            r#"
            SELECT * FROM runs
            WHERE status = 'QUEUED'
            ORDER BY created_at ASC, rowid ASC
            LIMIT 1
            "#,
        )
        .fetch_optional(self.pool())
        .await?
        .as_ref()
        .map(run_from_row)
        .transpose()
    }

    pub async fn recent_runs(&self, client_id: &str, limit: i64) -> Result<Vec<Run>, sqlx::Error> {
        sqlx::query(
            r#"
            SELECT * FROM runs
            WHERE client_id = ?1
            ORDER BY created_at DESC, rowid DESC
            LIMIT ?2
            "#,
        )
        .bind(client_id)
        .bind(limit)
        .fetch_all(self.pool())
        .await?
        .iter()
        .map(run_from_row)
        .collect()
    }

    /// Moves a run from QUEUED to RUNNING. The status predicate makes this a
    /// compare-and-swap: of several concurrent callers exactly one sees `true`.
    #[instrument(target = "db_query", level = "info", skip(self))]
    pub async fn claim_run(&self, run_id: &str, started_at: DateTime<Utc>) -> Result<bool, sqlx::Error> {
        let affected = sqlx::query(
            r#"
            UPDATE runs
            SET status = 'RUNNING', started_at = ?1
            WHERE id = ?2 AND status = 'QUEUED'
            "#,
        )
        .bind(encode_time(&started_at))
        .bind(run_id)
        .execute(self.pool())
        .await?
        .rows_affected();

        debug!(target: TARGET_DB, "Claim of run {} affected {} rows", run_id, affected);
        Ok(affected == 1)
    }

    /// Writes a terminal status for a RUNNING run. Returns `false` if the run
    /// was no longer RUNNING (for example, cancelled while executing).
    #[instrument(target = "db_query", level = "info", skip(self, error_message))]
    pub async fn finish_run(
        &self,
        run_id: &str,
        status: RunStatus,
        error_message: Option<&str>,
        finished_at: DateTime<Utc>,
    ) -> Result<bool, sqlx::Error> {
        debug_assert!(status.is_terminal());

        let affected = sqlx::query(
            r#"
            UPDATE runs
            SET status = ?1, finished_at = ?2, error_message = ?3
            WHERE id = ?4 AND status = 'RUNNING'
            "#,
        )
        .bind(status.as_str())
        .bind(encode_time(&finished_at))
        .bind(error_message)
        .bind(run_id)
        .execute(self.pool())
        .await?
        .rows_affected();

        Ok(affected == 1)
    }

    /// Forces a QUEUED or RUNNING run to FAILED with `error_message`.
    /// Returns `false` when the run is missing or already terminal.
    #[instrument(target = "db_query", level = "info", skip(self))]
    pub async fn fail_active_run(
        &self,
        run_id: &str,
        error_message: &str,
        finished_at: DateTime<Utc>,
    ) -> Result<bool, sqlx::Error> {
        let affected = sqlx::query(
            r#"
            UPDATE runs
            SET status = 'FAILED', finished_at = ?1, error_message = ?2
            WHERE id = ?3 AND status IN ('QUEUED', 'RUNNING')
            "#,
        )
        .bind(encode_time(&finished_at))
        .bind(error_message)
        .bind(run_id)
        .execute(self.pool())
        .await?
        .rows_affected();

        Ok(affected == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::core::is_unique_violation;

    #[tokio::test]
    async fn test_run_status_transitions() {
        let db = Database::in_memory().await.unwrap();
        let client = db.create_client("org-1", "Acme", None).await.unwrap();
        let run = db.insert_queued_run("org-1", &client.id).await.unwrap();
        assert_eq!(run.status, RunStatus::Queued);
        assert!(run.started_at.is_none());

        // Terminal writes require RUNNING.
        assert!(!db.finish_run(&run.id, RunStatus::Success, None, Utc::now()).await.unwrap());

        assert!(db.claim_run(&run.id, Utc::now()).await.unwrap());
        assert!(!db.claim_run(&run.id, Utc::now()).await.unwrap());

        assert!(db.finish_run(&run.id, RunStatus::Failed, Some("boom"), Utc::now()).await.unwrap());
        let stored = db.get_run(&run.id).await.unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Failed);
        assert_eq!(stored.error_message.as_deref(), Some("boom"));
        assert!(stored.started_at.is_some());
        assert!(stored.finished_at.is_some());

        // Terminal runs stay put.
        assert!(!db.finish_run(&run.id, RunStatus::Success, None, Utc::now()).await.unwrap());
        assert!(!db.fail_active_run(&run.id, "late", Utc::now()).await.unwrap());
        assert_eq!(db.get_run(&run.id).await.unwrap().unwrap().error_message.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_one_active_run_per_client_index() {
        let db = Database::in_memory().await.unwrap();
        let client = db.create_client("org-1", "Acme", None).await.unwrap();
        let first = db.insert_queued_run("org-1", &client.id).await.unwrap();

        let err = db.insert_queued_run("org-1", &client.id).await.unwrap_err();
        assert!(is_unique_violation(&err));

        let active = db.active_run_for_client(&client.id).await.unwrap().unwrap();
        assert_eq!(active.id, first.id);

        // Once terminal, a new run can be queued.
        assert!(db.fail_active_run(&first.id, "stop", Utc::now()).await.unwrap());
        assert!(db.active_run_for_client(&client.id).await.unwrap().is_none());
        let second = db.insert_queued_run("org-1", &client.id).await.unwrap();
        assert_ne!(second.id, first.id);

        let recent = db.recent_runs(&client.id, 10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].id, second.id);
    }

    #[tokio::test]
    async fn test_oldest_queued_run_is_fifo() {
        let db = Database::in_memory().await.unwrap();
        let a = db.create_client("org-1", "A", None).await.unwrap();
        let b = db.create_client("org-1", "B", None).await.unwrap();
        assert!(db.oldest_queued_run().await.unwrap().is_none());

        let first = db.insert_queued_run("org-1", &a.id).await.unwrap();
        let second = db.insert_queued_run("org-1", &b.id).await.unwrap();

        assert_eq!(db.oldest_queued_run().await.unwrap().unwrap().id, first.id);
        assert!(db.claim_run(&first.id, Utc::now()).await.unwrap());
        assert_eq!(db.oldest_queued_run().await.unwrap().unwrap().id, second.id);
    }
}
