//! Type definitions for the search module.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Duration;

/// An active alert's search term, tagged with the alert it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertQuery {
    pub alert_id: String,
    pub query: String,
}

impl AlertQuery {
    pub fn new(alert_id: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            alert_id: alert_id.into(),
            query: query.into(),
        }
    }
}

/// Provider-side recency filter, the coarsest hint the provider understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecencyWindow {
    Hour,
    Day,
    Week,
    Month,
    Year,
}

impl RecencyWindow {
    /// Value of the `tbs` request parameter.
    pub fn as_tbs(&self) -> &'static str {
        match self {
            RecencyWindow::Hour => "qdr:h",
            RecencyWindow::Day => "qdr:d",
            RecencyWindow::Week => "qdr:w",
            RecencyWindow::Month => "qdr:m",
            RecencyWindow::Year => "qdr:y",
        }
    }
}

/// What to ask the provider for: either the first page of a query or a
/// continuation URL handed back by a previous page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageRequest {
    First { query: String, window: RecencyWindow },
    Next { url: String },
}

/// One organic result as reported by the provider.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchHit {
    pub position: Option<u32>,
    pub title: Option<String>,
    pub link: Option<String>,
    pub snippet: Option<String>,
    pub source: Option<String>,
    pub date: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SearchPage {
    pub hits: Vec<SearchHit>,
    /// Continuation URL, `None` on the last page.
    pub next: Option<String>,
}

/// A normalized, scored search result ready for ingestion.
#[derive(Debug, Clone, Serialize)]
pub struct CandidateArticle {
    pub alert_id: String,
    pub url: String,
    pub canonical_url: String,
    pub title: Option<String>,
    pub outlet: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub snippet: Option<String>,
    pub relevance_score: u8,
    pub importance_score: u8,
}

/// SerpApi response envelope. Only the fields the fetcher reads are modelled.
#[derive(Debug, Deserialize)]
pub struct SerpApiResponse {
    #[serde(default)]
    pub organic_results: Vec<SearchHit>,
    pub serpapi_pagination: Option<SerpApiPagination>,
    pub search_metadata: Option<SerpApiMetadata>,
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SerpApiPagination {
    pub next: Option<String>,
    pub next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SerpApiMetadata {
    pub status: Option<String>,
}

// Constants
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_SERPAPI_BASE_URL: &str = "https://serpapi.com/search.json";
pub const DEFAULT_MAX_PAGES: usize = 100;
/// Results per provider page, used to derive a rank when `position` is missing.
pub const RESULTS_PER_PAGE: u32 = 10;
