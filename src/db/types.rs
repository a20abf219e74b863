//! Row types for the four coverage tables.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize)]
pub struct Client {
    pub id: String,
    pub org_id: String,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A persisted search-term subscription. `last_checked_at == None` means the
/// alert has never been part of a completed fetch.
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub id: String,
    pub client_id: String,
    pub query: String,
    pub label: Option<String>,
    pub active: bool,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Queued,
    Running,
    Success,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Queued => "QUEUED",
            RunStatus::Running => "RUNNING",
            RunStatus::Success => "SUCCESS",
            RunStatus::Failed => "FAILED",
        }
    }

    /// QUEUED and RUNNING runs block new refreshes for the same client.
    pub fn is_active(&self) -> bool {
        matches!(self, RunStatus::Queued | RunStatus::Running)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "QUEUED" => Ok(RunStatus::Queued),
            "RUNNING" => Ok(RunStatus::Running),
            "SUCCESS" => Ok(RunStatus::Success),
            "FAILED" => Ok(RunStatus::Failed),
            other => Err(format!("unknown run status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Run {
    pub id: String,
    pub org_id: String,
    pub client_id: String,
    pub status: RunStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Article {
    pub id: String,
    pub org_id: String,
    pub client_id: String,
    pub url: String,
    pub canonical_url: String,
    pub title: Option<String>,
    pub outlet: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub snippet: Option<String>,
    pub summary: Option<String>,
    pub relevance_score: u8,
    pub importance_score: u8,
    pub labels: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Mutable article fields written by an upsert keyed on
/// `(client_id, canonical_url)`.
#[derive(Debug, Clone, Default)]
pub struct ArticleUpsert {
    pub url: String,
    pub canonical_url: String,
    pub title: Option<String>,
    pub outlet: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub snippet: Option<String>,
    pub summary: Option<String>,
    pub relevance_score: u8,
    pub importance_score: u8,
    pub labels: Vec<String>,
}

pub const DEFAULT_ARTICLE_LIMIT: i64 = 50;

/// Filters for the coverage listing. Bounds on `published_at` are inclusive.
#[derive(Debug, Clone)]
pub struct ArticleFilter {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub text: Option<String>,
    pub min_relevance: Option<i64>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for ArticleFilter {
    fn default() -> Self {
        Self {
            from: None,
            to: None,
            text: None,
            min_relevance: None,
            limit: DEFAULT_ARTICLE_LIMIT,
            offset: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ArticlePage {
    pub articles: Vec<Article>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}
