use std::io;
use tracing_appender::rolling;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

const DEFAULT_STDOUT_FILTER: &str = "info,web_request=warn,db_query=warn,sqlx=off";
const FILE_FILTER: &str = "info,worker=debug,web_request=debug,db_query=debug,sqlx=info";

/// Installs the global subscriber: stdout filtered by `RUST_LOG` (or a quiet
/// default) and a daily-rolling file under `log_dir`.
pub fn configure_logging(log_dir: &str) {
    // Stdout log configuration
    let stdout_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_STDOUT_FILTER));
    let stdout_log = fmt::layer()
        .with_writer(io::stdout)
        .with_filter(stdout_filter);

    // File log configuration
    let file_appender = rolling::daily(log_dir, "pressclip.log");
    let file_log = fmt::layer()
        .with_ansi(false)
        .with_writer(file_appender)
        .with_filter(EnvFilter::new(FILE_FILTER));

    tracing_subscriber::Registry::default()
        .with(stdout_log)
        .with(file_log)
        .init();
}
