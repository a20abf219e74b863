//! Polling worker. Several processes may run this loop against one database;
//! the conditional claim guarantees each run executes once.

use anyhow::Result;
use rand::Rng;
use std::future::Future;
use tokio::sync::watch;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, warn};

use crate::db::RunStatus;
use crate::error::CoordinatorError;
use crate::ingest::Ingestor;
use crate::runs::RunCoordinator;
use crate::TARGET_WORKER;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Attempts at writing a run's final status before giving up.
const MAX_RECORD_ATTEMPTS: u32 = 5;

/// What a single poll did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerTick {
    /// No QUEUED run, or another worker claimed it first.
    Idle,
    /// A run was executed. `recorded` is false when the outcome was not
    /// written because the run had been cancelled meanwhile.
    Finished {
        run_id: String,
        status: RunStatus,
        recorded: bool,
    },
}

pub struct Worker {
    name: String,
    coordinator: RunCoordinator,
    ingestor: Ingestor,
    poll_interval: Duration,
}

impl Worker {
    pub fn new(name: impl Into<String>, coordinator: RunCoordinator, ingestor: Ingestor) -> Self {
        Self {
            name: name.into(),
            coordinator,
            ingestor,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Claims the oldest QUEUED run and executes it to completion.
    pub async fn run_once(&self) -> Result<WorkerTick> {
        let Some(run) = self.coordinator.claim_next().await? else {
            return Ok(WorkerTick::Idle);
        };
        info!(target: TARGET_WORKER, "[{}]: claimed run {} for client {}.", self.name, run.id, run.client_id);

        let (status, error_message) = match self.ingestor.execute_run(&run).await {
            Ok(summary) => {
                info!(target: TARGET_WORKER, "[{}]: run {} succeeded ({} alerts, {} results, {} upserted).", self.name, run.id, summary.alerts, summary.fetched, summary.upserted);
                (RunStatus::Success, None)
            }
            Err(err) => {
                let message = err.to_string();
                error!(target: TARGET_WORKER, "[{}]: run {} failed: {}", self.name, run.id, message);
                (RunStatus::Failed, Some(message))
            }
        };

        let coordinator = &self.coordinator;
        let run_id = run.id.as_str();
        let message = error_message.as_deref();
        let recorded = retry_terminal_write(&self.name, run_id, move || coordinator.complete(run_id, message)).await?;

        Ok(WorkerTick::Finished {
            run_id: run.id,
            status,
            recorded,
        })
    }

    /// Polls until `shutdown` flips to true, sleeping for the poll interval
    /// whenever there is no work.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(target: TARGET_WORKER, "[{}]: starting worker loop, polling every {:?}.", self.name, self.poll_interval);

        loop {
            let stop = *shutdown.borrow();
            if stop {
                break;
            }

            let idle = match self.run_once().await {
                Ok(WorkerTick::Idle) => {
                    debug!(target: TARGET_WORKER, "[{}]: no queued runs, sleeping.", self.name);
                    true
                }
                Ok(WorkerTick::Finished { .. }) => false,
                Err(err) => {
                    error!(target: TARGET_WORKER, "[{}]: error polling for runs ({:?}), sleeping.", self.name, err);
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = sleep(self.poll_interval) => {}
                    changed = shutdown.changed() => {
                        // Sender gone: nobody can stop us, keep the normal cadence.
                        if changed.is_err() {
                            sleep(self.poll_interval).await;
                        }
                    }
                }
            }
        }

        info!(target: TARGET_WORKER, "[{}]: worker loop stopped.", self.name);
    }
}

/// Repeats `write` on store errors so a claimed run is not left RUNNING by a
/// transient failure.
async fn retry_terminal_write<F, Fut>(worker: &str, run_id: &str, mut write: F) -> Result<bool, CoordinatorError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, CoordinatorError>>,
{
    let mut backoff: u64 = 100; // initial delay in milliseconds
    let mut attempt = 1;

    loop {
        match write().await {
            Ok(recorded) => return Ok(recorded),
            Err(err) if attempt < MAX_RECORD_ATTEMPTS => {
                warn!(target: TARGET_WORKER, "[{}]: failed to record outcome of run {} ({}), retrying in {}ms (attempt {}/{}).", worker, run_id, err, backoff, attempt, MAX_RECORD_ATTEMPTS);
                sleep(Duration::from_millis(backoff)).await;
                backoff = backoff.saturating_mul(2) + rand::rng().random_range(0..100);
                attempt += 1;
            }
            Err(err) => {
                error!(target: TARGET_WORKER, "[{}]: giving up recording outcome of run {}: {}", worker, run_id, err);
                return Err(err);
            }
        }
    }
}
