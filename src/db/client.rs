use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite};
use tracing::{debug, instrument};
use uuid::Uuid;

use super::core::{decode_optional_time, decode_time, encode_time, Database};
use super::types::{Alert, Client};
use crate::TARGET_DB;

fn client_from_row(row: &SqliteRow) -> Result<Client, sqlx::Error> {
    Ok(Client {
        id: row.try_get("id")?,
        org_id: row.try_get("org_id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        created_at: decode_time(&row.try_get::<String, _>("created_at")?)?,
        updated_at: decode_time(&row.try_get::<String, _>("updated_at")?)?,
    })
}

fn alert_from_row(row: &SqliteRow) -> Result<Alert, sqlx::Error> {
    Ok(Alert {
        id: row.try_get("id")?,
        client_id: row.try_get("client_id")?,
        query: row.try_get("query")?,
        label: row.try_get("label")?,
        active: row.try_get("active")?,
        last_checked_at: decode_optional_time(row.try_get("last_checked_at")?)?,
        created_at: decode_time(&row.try_get::<String, _>("created_at")?)?,
    })
}

impl Database {
    #[instrument(target = "db_query", level = "info", skip(self, description))]
    pub async fn create_client(
        &self,
        org_id: &str,
        name: &str,
        description: Option<&str>,
    ) -> Result<Client, sqlx::Error> {
        let id = Uuid::new_v4().to_string();
        let now = encode_time(&Utc::now());

        let row = sqlx::query(
            r#"
            INSERT INTO clients (id, org_id, name, description, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?5)
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(org_id)
        .bind(name)
        .bind(description)
        .bind(&now)
        .fetch_one(self.pool())
        .await?;

        debug!(target: TARGET_DB, "Created client {} ({})", name, id);
        client_from_row(&row)
    }

    pub async fn get_client(&self, client_id: &str) -> Result<Option<Client>, sqlx::Error> {
        sqlx::query("SELECT * FROM clients WHERE id = ?1")
            .bind(client_id)
            .fetch_optional(self.pool())
            .await?
            .as_ref()
            .map(client_from_row)
            .transpose()
    }

    pub async fn list_clients(&self, org_id: &str) -> Result<Vec<Client>, sqlx::Error> {
        sqlx::query("SELECT * FROM clients WHERE org_id = ?1 ORDER BY name ASC")
            .bind(org_id)
            .fetch_all(self.pool())
            .await?
            .iter()
            .map(client_from_row)
            .collect()
    }

    /// Removes a client. Alerts, runs and articles go with it.
    #[instrument(target = "db_query", level = "info", skip(self))]
    pub async fn delete_client(&self, client_id: &str) -> Result<bool, sqlx::Error> {
        let affected = sqlx::query("DELETE FROM clients WHERE id = ?1")
            .bind(client_id)
            .execute(self.pool())
            .await?
            .rows_affected();
        Ok(affected > 0)
    }

    async fn touch_client(&self, client_id: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE clients SET updated_at = ?1 WHERE id = ?2")
            .bind(encode_time(&Utc::now()))
            .bind(client_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Adds an active alert. Callers are expected to have trimmed and
    /// validated `query`.
    #[instrument(target = "db_query", level = "info", skip(self))]
    pub async fn add_alert(
        &self,
        client_id: &str,
        query: &str,
        label: Option<&str>,
    ) -> Result<Alert, sqlx::Error> {
        let id = Uuid::new_v4().to_string();

        let row = sqlx::query(
            r#"
            INSERT INTO alerts (id, client_id, query, label, active, last_checked_at, created_at)
            VALUES (?1, ?2, ?3, ?4, 1, NULL, ?5)
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(client_id)
        .bind(query)
        .bind(label)
        .bind(encode_time(&Utc::now()))
        .fetch_one(self.pool())
        .await?;

        self.touch_client(client_id).await?;
        debug!(target: TARGET_DB, "Added alert {} for client {}", id, client_id);
        alert_from_row(&row)
    }

    /// Hard-deletes an alert, scoped to its owning client.
    #[instrument(target = "db_query", level = "info", skip(self))]
    pub async fn delete_alert(&self, client_id: &str, alert_id: &str) -> Result<bool, sqlx::Error> {
        let affected = sqlx::query("DELETE FROM alerts WHERE id = ?1 AND client_id = ?2")
            .bind(alert_id)
            .bind(client_id)
            .execute(self.pool())
            .await?
            .rows_affected();

        if affected > 0 {
            self.touch_client(client_id).await?;
        }
        Ok(affected > 0)
    }

    pub async fn set_alert_active(
        &self,
        client_id: &str,
        alert_id: &str,
        active: bool,
    ) -> Result<bool, sqlx::Error> {
        let affected = sqlx::query("UPDATE alerts SET active = ?1 WHERE id = ?2 AND client_id = ?3")
            .bind(active)
            .bind(alert_id)
            .bind(client_id)
            .execute(self.pool())
            .await?
            .rows_affected();
        Ok(affected > 0)
    }

    pub async fn list_alerts(&self, client_id: &str) -> Result<Vec<Alert>, sqlx::Error> {
        sqlx::query("SELECT * FROM alerts WHERE client_id = ?1 ORDER BY created_at ASC, rowid ASC")
            .bind(client_id)
            .fetch_all(self.pool())
            .await?
            .iter()
            .map(alert_from_row)
            .collect()
    }

    /// Alerts that take part in a refresh.
    #[instrument(target = "db_query", level = "debug", skip(self))]
    pub async fn active_alerts(&self, client_id: &str) -> Result<Vec<Alert>, sqlx::Error> {
        sqlx::query(
            "SELECT * FROM alerts WHERE client_id = ?1 AND active = 1 ORDER BY created_at ASC, rowid ASC",
        )
        .bind(client_id)
        .fetch_all(self.pool())
        .await?
        .iter()
        .map(alert_from_row)
        .collect()
    }

    /// Sets `last_checked_at` on every listed alert.
    #[instrument(target = "db_query", level = "info", skip(self, alert_ids))]
    pub async fn mark_alerts_checked(
        &self,
        alert_ids: &[String],
        checked_at: DateTime<Utc>,
    ) -> Result<u64, sqlx::Error> {
        if alert_ids.is_empty() {
            return Ok(0);
        }

        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE alerts SET last_checked_at = ");
        builder.push_bind(encode_time(&checked_at));
        builder.push(" WHERE id IN (");
        let mut separated = builder.separated(", ");
        for id in alert_ids {
            separated.push_bind(id.as_str());
        }
        separated.push_unseparated(")");

        let affected = builder.build().execute(self.pool()).await?.rows_affected();
        debug!(target: TARGET_DB, "Marked {} alerts checked", affected);
        Ok(affected)
    }
}
