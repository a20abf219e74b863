use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
    Pool, Sqlite,
};
use std::str::FromStr;
use tokio::time::Duration;
use tracing::{info, instrument};

use crate::TARGET_DB;

#[derive(Clone)]
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    /// Get access to the database pool
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

// Helper method to check if an sqlx error is a database lock error
pub trait DbLockErrorExt {
    fn is_database_lock_error(&self) -> bool;
}

impl DbLockErrorExt for sqlx::Error {
    fn is_database_lock_error(&self) -> bool {
        match self {
            // SQLITE_BUSY (5), SQLITE_LOCKED (6) and their extended codes
            sqlx::Error::Database(err) => {
                matches!(err.code().as_deref(), Some("5" | "6" | "261" | "262" | "517"))
                    || err.message().contains("database is locked")
            }
            _ => false,
        }
    }
}

/// Whether an sqlx error is a UNIQUE constraint violation.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.is_unique_violation() || db_err.message().contains("UNIQUE constraint failed")
        }
        _ => false,
    }
}

/// Timestamps are stored as fixed-width RFC 3339 UTC text so that string
/// comparison in SQL matches chronological order.
pub(crate) fn encode_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn decode_time(value: &str) -> Result<DateTime<Utc>, sqlx::Error> {
    DateTime::parse_from_rfc3339(value)
        .map(|time| time.with_timezone(&Utc))
        .map_err(|e| sqlx::Error::Decode(format!("invalid timestamp '{}': {}", value, e).into()))
}

pub(crate) fn decode_optional_time(
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, sqlx::Error> {
    value.as_deref().map(decode_time).transpose()
}

impl Database {
    #[instrument(target = "db_query", level = "info")]
    pub async fn new(database_path: &str) -> Result<Self, sqlx::Error> {
        info!(target: TARGET_DB, "Creating database pool for: {}", database_path);

        let connect_options =
            SqliteConnectOptions::from_str(&format!("sqlite://{}", database_path))?
                .create_if_missing(true)
                .foreign_keys(true)
                .journal_mode(SqliteJournalMode::Wal)
                .busy_timeout(Duration::from_secs(5))
                .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;

        info!(target: TARGET_DB, "Database pool created");

        let db = Database { pool };
        db.initialize_schema().await?;

        Ok(db)
    }

    /// A private in-memory database, mostly for tests.
    pub async fn in_memory() -> Result<Self, sqlx::Error> {
        let connect_options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        // The database lives as long as its only connection.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(connect_options)
            .await?;

        let db = Database { pool };
        db.initialize_schema().await?;

        Ok(db)
    }

    /// Row counts per table, joined with ':' the way the status endpoint reports them.
    pub async fn collect_stats(&self) -> Result<String, sqlx::Error> {
        let queries = vec![
            "SELECT COUNT(*) FROM clients;",
            "SELECT COUNT(*) FROM alerts WHERE active = 1;",
            "SELECT COUNT(*) FROM runs WHERE status IN ('QUEUED', 'RUNNING');",
            "SELECT COUNT(*) FROM articles;",
        ];

        let mut results = vec![];
        for query in queries {
            let count: i64 = sqlx::query_scalar(query).fetch_one(&self.pool).await?;
            results.push(count);
        }

        Ok(results
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join(":"))
    }
}
