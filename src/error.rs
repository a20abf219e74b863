use thiserror::Error;

/// Failures talking to the search provider. Any of these aborts the whole fetch.
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Search provider HTTP error {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Search provider error: {0}")]
    Provider(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for SearchError {
    fn from(err: reqwest::Error) -> Self {
        SearchError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for SearchError {
    fn from(err: serde_json::Error) -> Self {
        SearchError::Parse(err.to_string())
    }
}

impl From<url::ParseError> for SearchError {
    fn from(err: url::ParseError) -> Self {
        SearchError::Parse(format!("invalid pagination URL: {}", err))
    }
}

/// Outcomes of run lifecycle operations that callers must distinguish.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("A run is already in progress")]
    Conflict { run_id: String },

    #[error("Run not found")]
    NotFound,

    #[error("Run is not active")]
    NotActive,

    #[error("{0}")]
    Validation(String),

    #[error("Store error: {0}")]
    Store(#[from] sqlx::Error),
}

/// Failures while executing one run. The message becomes the run's error text.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Client not found: {0}")]
    ClientNotFound(String),

    #[error(transparent)]
    Search(#[from] SearchError),

    #[error("Store error: {0}")]
    Store(#[from] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum PollError {
    #[error("Run {run_id} still {status} after {waited_secs}s")]
    Timeout {
        run_id: String,
        status: String,
        waited_secs: u64,
    },

    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),
}
