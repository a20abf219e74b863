pub mod api;
pub mod canonical;
pub mod db;
pub mod environment;
pub mod error;
pub mod ingest;
pub mod logging;
pub mod poller;
pub mod runs;
pub mod scoring;
pub mod search;
pub mod worker;

pub const TARGET_WEB_REQUEST: &str = "web_request";
pub const TARGET_DB: &str = "db_query";
pub const TARGET_WORKER: &str = "worker";

/// Error message recorded on runs forced to FAILED from outside the worker.
pub const CANCELLED_MESSAGE: &str = "Cancelled by user";
