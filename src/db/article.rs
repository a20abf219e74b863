use chrono::Utc;
use rand::Rng;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite};
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use super::core::{decode_optional_time, decode_time, encode_time, Database, DbLockErrorExt};
use super::types::{Article, ArticleFilter, ArticlePage, ArticleUpsert};
use crate::TARGET_DB;

const MAX_LOCK_RETRIES: u32 = 5;

fn article_from_row(row: &SqliteRow) -> Result<Article, sqlx::Error> {
    let labels: String = row.try_get("labels")?;
    let relevance: i64 = row.try_get("relevance_score")?;
    let importance: i64 = row.try_get("importance_score")?;
    Ok(Article {
        id: row.try_get("id")?,
        org_id: row.try_get("org_id")?,
        client_id: row.try_get("client_id")?,
        url: row.try_get("url")?,
        canonical_url: row.try_get("canonical_url")?,
        title: row.try_get("title")?,
        outlet: row.try_get("outlet")?,
        published_at: decode_optional_time(row.try_get("published_at")?)?,
        snippet: row.try_get("snippet")?,
        summary: row.try_get("summary")?,
        relevance_score: relevance.clamp(0, 100) as u8,
        importance_score: importance.clamp(0, 100) as u8,
        labels: serde_json::from_str(&labels).unwrap_or_default(),
        created_at: decode_time(&row.try_get::<String, _>("created_at")?)?,
        updated_at: decode_time(&row.try_get::<String, _>("updated_at")?)?,
    })
}

/// Appends the WHERE clause shared by the page query and its count.
fn push_article_filters<'a>(
    builder: &mut QueryBuilder<'a, Sqlite>,
    client_id: &'a str,
    filter: &'a ArticleFilter,
) {
    builder.push(" WHERE client_id = ");
    builder.push_bind(client_id);

    if let Some(from) = &filter.from {
        builder.push(" AND published_at >= ");
        builder.push_bind(encode_time(from));
    }
    if let Some(to) = &filter.to {
        builder.push(" AND published_at <= ");
        builder.push_bind(encode_time(to));
    }
    if let Some(min) = filter.min_relevance {
        builder.push(" AND relevance_score >= ");
        builder.push_bind(min);
    }
    if let Some(text) = filter.text.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        // SQLite's lower() only folds ASCII, so match against text folded here.
        let pattern = format!("%{}%", escape_like(&text.to_lowercase()));
        builder.push(" AND search_text LIKE ");
        builder.push_bind(pattern);
        builder.push(" ESCAPE '\\'");
    }
}

/// Lowercased searchable fields, one per line.
fn search_text(article: &ArticleUpsert) -> String {
    [&article.title, &article.outlet, &article.snippet]
        .into_iter()
        .flatten()
        .map(|field| field.to_lowercase())
        .collect::<Vec<_>>()
        .join("\n")
}

fn escape_like(term: &str) -> String {
    term.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

impl Database {
    /// Upserts a batch of articles for one client in a single transaction.
    ///
    /// Rows conflict on `(client_id, canonical_url)`; a conflicting row has
    /// every mutable field overwritten by the incoming values. Lock errors are
    /// retried with exponential backoff.
    #[instrument(target = "db_query", level = "info", skip(self, articles), fields(count = articles.len()))]
    pub async fn upsert_articles(
        &self,
        org_id: &str,
        client_id: &str,
        articles: &[ArticleUpsert],
    ) -> Result<u64, sqlx::Error> {
        if articles.is_empty() {
            debug!(target: TARGET_DB, "No articles to upsert for client {}", client_id);
            return Ok(0);
        }

        let mut backoff: u64 = 100; // initial delay in milliseconds

        for attempt in 1..=MAX_LOCK_RETRIES {
            match self.upsert_articles_once(org_id, client_id, articles).await {
                Ok(written) => {
                    info!(target: TARGET_DB, "Upserted {} articles for client {}", written, client_id);
                    return Ok(written);
                }
                Err(err) if err.is_database_lock_error() => {
                    info!(target: TARGET_DB, "Database is locked, waiting {}ms before retrying attempt {}/{}", backoff, attempt, MAX_LOCK_RETRIES);
                    sleep(Duration::from_millis(backoff)).await;
                    // Jitter so racing workers do not retry in lockstep.
                    backoff = backoff.saturating_mul(2) + rand::rng().random_range(0..100);
                }
                Err(err) => {
                    error!(target: TARGET_DB, "Failed to upsert articles for client {}: {}", client_id, err);
                    return Err(err);
                }
            }
        }

        Err(sqlx::Error::Protocol(
            "Maximum retries exceeded for upserting articles".into(),
        ))
    }

    async fn upsert_articles_once(
        &self,
        org_id: &str,
        client_id: &str,
        articles: &[ArticleUpsert],
    ) -> Result<u64, sqlx::Error> {
        let now = encode_time(&Utc::now());
        let mut transaction = self.pool().begin().await?;
        let mut written = 0;

        for article in articles {
            let labels = serde_json::to_string(&article.labels)
                .map_err(|e| sqlx::Error::Encode(Box::new(e)))?;

            written += sqlx::query(
                r#"
                INSERT INTO articles (
                    id, org_id, client_id, url, canonical_url, title, outlet, published_at,
                    snippet, summary, relevance_score, importance_score, labels, search_text,
                    created_at, updated_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?15)
                ON CONFLICT(client_id, canonical_url) DO UPDATE SET
                    org_id = excluded.org_id,
                    url = excluded.url,
                    title = excluded.title,
                    outlet = excluded.outlet,
                    published_at = excluded.published_at,
                    snippet = excluded.snippet,
                    summary = excluded.summary,
                    relevance_score = excluded.relevance_score,
                    importance_score = excluded.importance_score,
                    labels = excluded.labels,
                    search_text = excluded.search_text,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(org_id)
            .bind(client_id)
            .bind(&article.url)
            .bind(&article.canonical_url)
            .bind(&article.title)
            .bind(&article.outlet)
            .bind(article.published_at.as_ref().map(encode_time))
            .bind(&article.snippet)
            .bind(&article.summary)
            .bind(i64::from(article.relevance_score))
            .bind(i64::from(article.importance_score))
            .bind(labels)
            .bind(search_text(article))
            .bind(&now)
            .execute(&mut *transaction)
            .await?
            .rows_affected();
        }

        transaction.commit().await?;
        Ok(written)
    }

    /// Coverage listing for a client, newest first with undated rows last.
    #[instrument(target = "db_query", level = "debug", skip(self))]
    pub async fn query_articles(
        &self,
        client_id: &str,
        filter: &ArticleFilter,
    ) -> Result<ArticlePage, sqlx::Error> {
        let limit = filter.limit.max(0);
        let offset = filter.offset.max(0);

        let mut count_query: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT COUNT(*) FROM articles");
        push_article_filters(&mut count_query, client_id, filter);
        let total: i64 = count_query
            .build_query_scalar()
            .fetch_one(self.pool())
            .await?;

        let mut page_query: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT * FROM articles");
        push_article_filters(&mut page_query, client_id, filter);
        page_query.push(" ORDER BY published_at IS NULL, published_at DESC, rowid DESC LIMIT ");
        page_query.push_bind(limit);
        page_query.push(" OFFSET ");
        page_query.push_bind(offset);

        let articles = page_query
            .build()
            .fetch_all(self.pool())
            .await?
            .iter()
            .map(article_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ArticlePage {
            articles,
            total,
            limit,
            offset,
        })
    }

    pub async fn count_articles(&self, client_id: &str) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM articles WHERE client_id = ?1")
            .bind(client_id)
            .fetch_one(self.pool())
            .await
    }
}
