use tracing::info;

use super::core::Database;
use crate::TARGET_DB;

impl Database {
    pub(crate) async fn initialize_schema(&self) -> Result<(), sqlx::Error> {
        let mut conn = self.pool().acquire().await?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS clients (
                id TEXT PRIMARY KEY,
                org_id TEXT NOT NULL,
                name TEXT NOT NULL,
                description TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_clients_org_id ON clients (org_id);

            CREATE TABLE IF NOT EXISTS alerts (
                id TEXT PRIMARY KEY,
                client_id TEXT NOT NULL,
                query TEXT NOT NULL,
                label TEXT,
                active BOOLEAN NOT NULL DEFAULT 1,
                last_checked_at TEXT, -- NULL until the alert's first completed fetch
                created_at TEXT NOT NULL,
                FOREIGN KEY (client_id) REFERENCES clients (id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_alerts_client_active ON alerts (client_id, active);

            CREATE TABLE IF NOT EXISTS runs (
                id TEXT PRIMARY KEY,
                org_id TEXT NOT NULL,
                client_id TEXT NOT NULL,
                status TEXT NOT NULL CHECK (status IN ('QUEUED', 'RUNNING', 'SUCCESS', 'FAILED')),
                started_at TEXT,
                finished_at TEXT,
                error_message TEXT,
                created_at TEXT NOT NULL,
                FOREIGN KEY (client_id) REFERENCES clients (id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_runs_status_created_at ON runs (status, created_at);
            CREATE INDEX IF NOT EXISTS idx_runs_client_created_at ON runs (client_id, created_at);
            -- At most one QUEUED/RUNNING run per client
            CREATE UNIQUE INDEX IF NOT EXISTS idx_runs_one_active_per_client
                ON runs (client_id) WHERE status IN ('QUEUED', 'RUNNING');

            CREATE TABLE IF NOT EXISTS articles (
                id TEXT PRIMARY KEY,
                org_id TEXT NOT NULL,
                client_id TEXT NOT NULL,
                url TEXT NOT NULL,
                canonical_url TEXT NOT NULL,
                title TEXT,
                outlet TEXT,
                published_at TEXT,
                snippet TEXT,
                summary TEXT,
                relevance_score INTEGER NOT NULL DEFAULT 0,
                importance_score INTEGER NOT NULL DEFAULT 0,
                labels TEXT NOT NULL DEFAULT '[]', -- JSON array of strings
                search_text TEXT NOT NULL DEFAULT '', -- lowercased title, outlet and snippet
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (client_id, canonical_url),
                FOREIGN KEY (client_id) REFERENCES clients (id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_articles_client_published_at ON articles (client_id, published_at);
            CREATE INDEX IF NOT EXISTS idx_articles_client_relevance ON articles (client_id, relevance_score);
            "#,
        )
        .execute(&mut *conn)
        .await?;

        info!(target: TARGET_DB, "Database schema initialized");
        Ok(())
    }
}
