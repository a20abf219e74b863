//! Executes one claimed run: fetch coverage for the client's active alerts,
//! upsert it, then advance the alerts' watermarks.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::canonical::canonicalize_url;
use crate::db::{Alert, ArticleUpsert, Database, Run};
use crate::error::IngestError;
use crate::search::{AlertQuery, CandidateArticle, SearchClient};
use crate::TARGET_WORKER;

/// How far back the first fetch for never-checked alerts looks.
pub const DEFAULT_LOOKBACK_HOURS: i64 = 24;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    pub alerts: usize,
    pub fetched: usize,
    pub upserted: u64,
}

/// The newest `last_checked_at` among `alerts`, or [`DEFAULT_LOOKBACK_HOURS`]
/// before `now` when none has been checked.
pub fn since_watermark(alerts: &[Alert], now: DateTime<Utc>) -> DateTime<Utc> {
    alerts
        .iter()
        .filter_map(|alert| alert.last_checked_at)
        .max()
        .unwrap_or_else(|| now - Duration::hours(DEFAULT_LOOKBACK_HOURS))
}

/// Maps a search result onto the article row written for it. Undated results
/// are stamped with `now` so they stay visible under recency filters.
pub fn to_upsert(candidate: CandidateArticle, now: DateTime<Utc>) -> ArticleUpsert {
    let canonical_url = if candidate.canonical_url.trim().is_empty() {
        canonicalize_url(&candidate.url)
    } else {
        candidate.canonical_url
    };

    ArticleUpsert {
        url: candidate.url,
        canonical_url,
        title: candidate.title,
        outlet: candidate.outlet,
        published_at: Some(candidate.published_at.unwrap_or(now)),
        snippet: candidate.snippet,
        summary: None,
        relevance_score: candidate.relevance_score,
        importance_score: candidate.importance_score,
        labels: Vec::new(),
    }
}

#[derive(Clone)]
pub struct Ingestor {
    db: Database,
    search: SearchClient,
}

impl Ingestor {
    pub fn new(db: Database, search: SearchClient) -> Self {
        Self { db, search }
    }

    /// Runs the pipeline for `run`'s client. Any error means the run failed;
    /// a failed watermark update is only logged.
    #[instrument(target = "worker", level = "info", skip(self, run), fields(run_id = %run.id, client_id = %run.client_id))]
    pub async fn execute_run(&self, run: &Run) -> Result<IngestSummary, IngestError> {
        let client = self
            .db
            .get_client(&run.client_id)
            .await?
            .ok_or_else(|| IngestError::ClientNotFound(run.client_id.clone()))?;

        let alerts = self.db.active_alerts(&client.id).await?;
        if alerts.is_empty() {
            info!(target: TARGET_WORKER, "Client {} has no active alerts, nothing to fetch", client.id);
            return Ok(IngestSummary::default());
        }

        let now = Utc::now();
        let since = since_watermark(&alerts, now);
        let queries: Vec<AlertQuery> = alerts
            .iter()
            .map(|alert| AlertQuery::new(alert.id.clone(), alert.query.clone()))
            .collect();

        let candidates = self.search.fetch(&queries, since, now).await?;
        let fetched = candidates.len();

        let rows: Vec<ArticleUpsert> = candidates
            .into_iter()
            .map(|candidate| to_upsert(candidate, now))
            .collect();
        let upserted = self.db.upsert_articles(&client.org_id, &client.id, &rows).await?;

        let alert_ids: Vec<String> = alerts.into_iter().map(|alert| alert.id).collect();
        if let Err(err) = self.db.mark_alerts_checked(&alert_ids, Utc::now()).await {
            warn!(target: TARGET_WORKER, "Failed to advance last_checked_at for client {}: {}", client.id, err);
        }

        info!(target: TARGET_WORKER, "Run {} fetched {} results, upserted {} articles", run.id, fetched, upserted);
        Ok(IngestSummary {
            alerts: alert_ids.len(),
            fetched,
            upserted,
        })
    }
}
