//! HTTP client creation and request handling for the search provider.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::header;
use tracing::{debug, error};
use url::Url;

use super::types::{
    PageRequest, SearchPage, SerpApiResponse, DEFAULT_SERPAPI_BASE_URL, REQUEST_TIMEOUT,
};
use crate::error::SearchError;
use crate::TARGET_WEB_REQUEST;

/// A paginated web-search backend.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Fetch one page of results.
    async fn fetch_page(&self, request: &PageRequest) -> Result<SearchPage, SearchError>;

    /// Provider name for logging.
    fn name(&self) -> &str {
        "unknown"
    }
}

pub fn create_http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .gzip(true)
        .timeout(REQUEST_TIMEOUT)
        .redirect(reqwest::redirect::Policy::default())
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {}", e))
}

/// Request parameters that stay fixed across every SerpApi call.
#[derive(Debug, Clone)]
pub struct SerpApiSettings {
    pub api_key: String,
    pub base_url: String,
    pub location: String,
    pub language: String,
    pub country: String,
}

impl SerpApiSettings {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_SERPAPI_BASE_URL.to_string(),
            location: "United States".to_string(),
            language: "en".to_string(),
            country: "us".to_string(),
        }
    }
}

/// Google web search through SerpApi.
pub struct SerpApiProvider {
    http: reqwest::Client,
    settings: SerpApiSettings,
}

impl SerpApiProvider {
    pub fn new(settings: SerpApiSettings) -> Result<Self> {
        Ok(Self {
            http: create_http_client()?,
            settings,
        })
    }

    /// Full request URL for a page, with the API key attached.
    pub fn request_url(&self, request: &PageRequest) -> Result<Url, SearchError> {
        match request {
            PageRequest::First { query, window } => {
                let mut url = Url::parse(&self.settings.base_url)?;
                url.query_pairs_mut()
                    .append_pair("engine", "google")
                    .append_pair("q", query)
                    .append_pair("tbs", window.as_tbs())
                    .append_pair("hl", &self.settings.language)
                    .append_pair("gl", &self.settings.country)
                    .append_pair("google_domain", "google.com")
                    .append_pair("api_key", &self.settings.api_key)
                    .append_pair("location", &self.settings.location);
                Ok(url)
            }
            PageRequest::Next { url } => {
                // Continuation links come back without the key.
                let mut url = Url::parse(url)?;
                let pairs: Vec<(String, String)> = url
                    .query_pairs()
                    .filter(|(key, _)| key != "api_key")
                    .map(|(key, value)| (key.into_owned(), value.into_owned()))
                    .collect();
                url.query_pairs_mut()
                    .clear()
                    .extend_pairs(pairs)
                    .append_pair("api_key", &self.settings.api_key);
                Ok(url)
            }
        }
    }
}

/// Turns a decoded SerpApi body into a page, surfacing provider-reported errors.
pub fn page_from_response(response: SerpApiResponse) -> Result<SearchPage, SearchError> {
    if let Some(message) = response.error.as_deref() {
        return Err(SearchError::Provider(message.to_string()));
    }
    let failed = response
        .search_metadata
        .as_ref()
        .and_then(|metadata| metadata.status.as_deref())
        == Some("Error");
    if failed {
        return Err(SearchError::Provider("Search failed".to_string()));
    }

    let next = response
        .serpapi_pagination
        .and_then(|pagination| pagination.next.or(pagination.next_link))
        .filter(|link| !link.trim().is_empty());

    Ok(SearchPage {
        hits: response.organic_results,
        next,
    })
}

#[async_trait]
impl SearchProvider for SerpApiProvider {
    async fn fetch_page(&self, request: &PageRequest) -> Result<SearchPage, SearchError> {
        let url = self.request_url(request)?;
        debug!(target: TARGET_WEB_REQUEST, "Requesting search page from {}", url.path());

        let response = self
            .http
            .get(url)
            .header(header::ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(target: TARGET_WEB_REQUEST, "Search provider returned {}: {}", status, body);
            return Err(SearchError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.text().await?;
        let decoded: SerpApiResponse = serde_json::from_str(&body)?;
        page_from_response(decoded)
    }

    fn name(&self) -> &str {
        "serpapi"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::types::RecencyWindow;

    fn provider() -> SerpApiProvider {
        SerpApiProvider::new(SerpApiSettings::new("secret")).unwrap()
    }

    #[test]
    fn test_first_page_request_shape() {
        let url = provider()
            .request_url(&PageRequest::First {
                query: "\"Acme Corp\"".to_string(),
                window: RecencyWindow::Day,
            })
            .unwrap();

        assert_eq!(url.host_str(), Some("serpapi.com"));
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        let get = |key: &str| pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str());
        assert_eq!(get("engine"), Some("google"));
        assert_eq!(get("q"), Some("\"Acme Corp\""));
        assert_eq!(get("tbs"), Some("qdr:d"));
        assert_eq!(get("hl"), Some("en"));
        assert_eq!(get("gl"), Some("us"));
        assert_eq!(get("google_domain"), Some("google.com"));
        assert_eq!(get("api_key"), Some("secret"));
        assert_eq!(get("location"), Some("United States"));
    }

    #[test]
    fn test_next_page_reattaches_key() {
        let url = provider()
            .request_url(&PageRequest::Next {
                url: "https://serpapi.com/search.json?engine=google&q=acme&start=10&api_key=stale"
                    .to_string(),
            })
            .unwrap();

        let keys: Vec<String> = url
            .query_pairs()
            .filter(|(k, _)| k == "api_key")
            .map(|(_, v)| v.into_owned())
            .collect();
        assert_eq!(keys, vec!["secret"]);
        assert!(url.query_pairs().any(|(k, v)| k == "start" && v == "10"));
    }

    #[test]
    fn test_page_from_response() {
        let body = r#"{
            "search_metadata": {"status": "Success"},
            "organic_results": [{"position": 1, "title": "Acme", "link": "https://example.com/a"}],
            "serpapi_pagination": {"next_link": "https://serpapi.com/search.json?start=10"}
        }"#;
        let page = page_from_response(serde_json::from_str(body).unwrap()).unwrap();
        assert_eq!(page.hits.len(), 1);
        assert_eq!(page.hits[0].position, Some(1));
        assert_eq!(page.next.as_deref(), Some("https://serpapi.com/search.json?start=10"));

        let last = page_from_response(serde_json::from_str(r#"{"serpapi_pagination": {"next": " "}}"#).unwrap()).unwrap();
        assert!(last.hits.is_empty());
        assert!(last.next.is_none());
    }

    #[test]
    fn test_provider_reported_errors() {
        let err = page_from_response(serde_json::from_str(r#"{"error": "Invalid API key."}"#).unwrap())
            .unwrap_err();
        assert!(err.to_string().contains("Invalid API key."));

        let err = page_from_response(
            serde_json::from_str(r#"{"search_metadata": {"status": "Error"}}"#).unwrap(),
        )
        .unwrap_err();
        assert!(matches!(err, SearchError::Provider(_)));
    }
}
