//! Client-side view of a run: poll its status until it is terminal.

use tokio::time::{sleep, Duration, Instant};
use tracing::debug;

use crate::db::Run;
use crate::error::PollError;
use crate::runs::RunCoordinator;
use crate::TARGET_WORKER;

#[derive(Debug, Clone, Copy)]
pub struct PollOptions {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            timeout: Duration::from_secs(300),
        }
    }
}

/// Returns the run as soon as it reaches SUCCESS or FAILED.
pub async fn wait_for_terminal(
    coordinator: &RunCoordinator,
    run_id: &str,
    options: PollOptions,
) -> Result<Run, PollError> {
    let started = Instant::now();

    loop {
        let run = coordinator.status(run_id).await?;
        if run.status.is_terminal() {
            return Ok(run);
        }

        if started.elapsed() >= options.timeout {
            return Err(PollError::Timeout {
                run_id: run.id,
                status: run.status.to_string(),
                waited_secs: started.elapsed().as_secs(),
            });
        }

        debug!(target: TARGET_WORKER, "Run {} is {}, checking again in {:?}", run_id, run.status, options.interval);
        sleep(options.interval).await;
    }
}
