//! Paging, deduplication and scoring across a run's alert queries.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use super::client::SearchProvider;
use super::types::{AlertQuery, CandidateArticle, PageRequest, SearchHit, DEFAULT_MAX_PAGES, RESULTS_PER_PAGE};
use super::util::{parse_date, recency_window, resolve_outlet, sanitize_query};
use crate::canonical::canonicalize_url;
use crate::error::SearchError;
use crate::scoring::{relevance_score, AuthorityTable};
use crate::TARGET_WEB_REQUEST;

/// Fetches coverage for a set of alert queries from one provider.
#[derive(Clone)]
pub struct SearchClient {
    provider: Arc<dyn SearchProvider>,
    authority: Arc<AuthorityTable>,
    max_pages: usize,
}

impl SearchClient {
    pub fn new(provider: Arc<dyn SearchProvider>, authority: Arc<AuthorityTable>) -> Self {
        Self {
            provider,
            authority,
            max_pages: DEFAULT_MAX_PAGES,
        }
    }

    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    /// Runs each alert's query in turn and returns every distinct result.
    ///
    /// A raw URL seen once is dropped from later pages and later queries.
    /// Any provider failure aborts the whole fetch and discards what was
    /// collected so far.
    #[instrument(target = "web_request", level = "info", skip(self, alerts), fields(alerts = alerts.len()))]
    pub async fn fetch(
        &self,
        alerts: &[AlertQuery],
        since: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<CandidateArticle>, SearchError> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut articles = Vec::new();
        let window = recency_window(since, now);

        for alert in alerts {
            let Some(query) = sanitize_query(&alert.query) else {
                warn!(target: TARGET_WEB_REQUEST, "Skipping alert {} with blank query", alert.alert_id);
                continue;
            };
            // Scoring matches against the plain words, not the quoted phrase.
            let scoring_query = query.trim_matches('"');

            let mut request = PageRequest::First {
                query: query.clone(),
                window,
            };

            for page_index in 0..self.max_pages {
                let page = match self.provider.fetch_page(&request).await {
                    Ok(page) => page,
                    Err(err) => {
                        warn!(target: TARGET_WEB_REQUEST, "{} search failed for {} on page {}: {}", self.provider.name(), query, page_index + 1, err);
                        return Err(err);
                    }
                };

                if page.hits.is_empty() {
                    break;
                }

                for (index, hit) in page.hits.iter().enumerate() {
                    let Some(link) = hit.link.as_deref().map(str::trim).filter(|l| !l.is_empty()) else {
                        continue;
                    };
                    if !seen.insert(link.to_string()) {
                        continue;
                    }
                    let rank = hit
                        .position
                        .filter(|p| *p > 0)
                        .unwrap_or(page_index as u32 * RESULTS_PER_PAGE + index as u32 + 1);
                    articles.push(self.to_candidate(&alert.alert_id, link, hit, rank, scoring_query, now));
                }

                match page.next {
                    Some(url) => request = PageRequest::Next { url },
                    None => break,
                }
            }

            debug!(target: TARGET_WEB_REQUEST, "Query {} done, {} distinct results so far", query, articles.len());
        }

        info!(target: TARGET_WEB_REQUEST, "Fetched {} distinct results for {} alerts", articles.len(), alerts.len());
        Ok(articles)
    }

    fn to_candidate(
        &self,
        alert_id: &str,
        link: &str,
        hit: &SearchHit,
        rank: u32,
        query: &str,
        now: DateTime<Utc>,
    ) -> CandidateArticle {
        let published_at = hit.date.as_deref().and_then(|d| parse_date(d, now));
        let title = hit.title.as_deref().map(str::trim).filter(|t| !t.is_empty());

        CandidateArticle {
            alert_id: alert_id.to_string(),
            url: link.to_string(),
            canonical_url: canonicalize_url(link),
            title: title.map(str::to_string),
            outlet: resolve_outlet(hit.source.as_deref(), link),
            published_at,
            snippet: hit.snippet.clone(),
            relevance_score: relevance_score(rank, title.unwrap_or(""), query),
            importance_score: self.authority.importance_score(link, published_at, now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::testing::{hit, page, ScriptedProvider};
    use crate::search::types::RecencyWindow;
    use chrono::Duration;

    fn client(provider: Arc<ScriptedProvider>) -> SearchClient {
        SearchClient::new(provider, Arc::new(AuthorityTable::default()))
    }

    #[tokio::test]
    async fn test_paginates_and_dedups_across_queries() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(page(
                vec![
                    hit(Some(1), "Acme Corp raises", "https://www.reuters.com/a"),
                    hit(Some(2), "Other", "https://example.com/b"),
                ],
                Some("https://serpapi.com/search.json?start=10"),
            )),
            Ok(page(vec![hit(None, "Acme again", "https://www.reuters.com/a")], None)),
            // Second alert repeats a URL from the first.
            Ok(page(
                vec![
                    hit(Some(1), "CEO", "https://example.com/b"),
                    hit(Some(2), "", "  "),
                    hit(Some(3), "CEO speaks", "https://example.com/c"),
                ],
                None,
            )),
        ]));
        let now = Utc::now();
        let alerts = vec![AlertQuery::new("a1", "Acme Corp"), AlertQuery::new("a2", "  Acme CEO ")];

        let results = client(provider.clone())
            .fetch(&alerts, now - Duration::hours(24), now)
            .await
            .unwrap();

        let urls: Vec<&str> = results.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(urls, vec!["https://www.reuters.com/a", "https://example.com/b", "https://example.com/c"]);
        assert_eq!(results[0].alert_id, "a1");
        assert_eq!(results[0].outlet.as_deref(), Some("reuters.com"));
        assert_eq!(results[2].alert_id, "a2");

        let requests = provider.requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(
            requests[0],
            PageRequest::First {
                query: "\"Acme Corp\"".to_string(),
                window: RecencyWindow::Day
            }
        );
        assert!(matches!(&requests[1], PageRequest::Next { url } if url.ends_with("start=10")));
        assert!(matches!(&requests[2], PageRequest::First { query, .. } if query == "\"Acme CEO\""));
    }

    #[tokio::test]
    async fn test_scores_use_rank_and_authority() {
        let mut dated = hit(None, "Acme Corp wins award", "https://www.nytimes.com/story");
        dated.date = Some("2 hours ago".to_string());
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(page(vec![hit(Some(1), "placeholder", "https://example.com/x")], Some("next"))),
            Ok(page(vec![hit(Some(11), "filler", "https://example.com/y"), dated], None)),
        ]));
        let now = Utc::now();

        let results = client(provider)
            .fetch(&[AlertQuery::new("a1", "Acme Corp")], now - Duration::hours(1), now)
            .await
            .unwrap();

        // Position missing on page two, index one: rank 12.
        let story = &results[2];
        assert_eq!(story.relevance_score, relevance_score(12, "Acme Corp wins award", "Acme Corp"));
        assert_eq!(story.importance_score, 100);
        assert!(story.published_at.is_some());
        assert_eq!(results[0].importance_score, 50);
    }

    #[tokio::test]
    async fn test_stops_on_empty_page_and_page_ceiling() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(page(vec![hit(Some(1), "a", "https://example.com/1")], Some("p2"))),
            Ok(page(vec![], Some("p3"))),
        ]));
        let now = Utc::now();
        let results = client(provider.clone())
            .fetch(&[AlertQuery::new("a1", "Acme")], now, now)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(provider.requests().len(), 2);

        let endless: Vec<_> = (0..5)
            .map(|i| Ok(page(vec![hit(None, "t", &format!("https://example.com/{}", i))], Some("more"))))
            .collect();
        let provider = Arc::new(ScriptedProvider::new(endless));
        let results = client(provider.clone())
            .with_max_pages(3)
            .fetch(&[AlertQuery::new("a1", "Acme")], now, now)
            .await
            .unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(provider.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_provider_error_aborts_fetch() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(page(vec![hit(Some(1), "a", "https://example.com/1")], None)),
            Err(SearchError::Http {
                status: 500,
                body: "upstream down".to_string(),
            }),
        ]));
        let now = Utc::now();
        let alerts = vec![AlertQuery::new("a1", "first"), AlertQuery::new("a2", "second")];

        let err = client(provider).fetch(&alerts, now, now).await.unwrap_err();
        assert!(err.to_string().contains("500"));
    }

    #[tokio::test]
    async fn test_no_alerts_makes_no_calls() {
        let provider = Arc::new(ScriptedProvider::default());
        let now = Utc::now();
        let results = client(provider.clone()).fetch(&[], now, now).await.unwrap();
        assert!(results.is_empty());
        assert!(provider.requests().is_empty());

        let blank = vec![AlertQuery::new("a1", "  \"\" ")];
        assert!(client(provider.clone()).fetch(&blank, now, now).await.unwrap().is_empty());
        assert!(provider.requests().is_empty());
    }
}
