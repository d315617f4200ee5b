//! Concurrent slide scheduler.
//!
//! Runs one pipeline invocation per job on a bounded pool. Each invocation
//! gets its own blocking thread and holds one semaphore permit for as long
//! as that thread is busy, so at most `workers` slides are ever open at once.
//! Nothing is shared between invocations except the opener and options.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::error::ExtractError;
use crate::pipeline::{CancelFlag, ExtractJob, ExtractionOutcome, Extractor};
use crate::slide::SlideOpener;

/// Default number of concurrent invocations.
pub const DEFAULT_WORKERS: usize = 48;

/// Outcome counts of a finished run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub completed: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl RunSummary {
    pub fn record(&mut self, outcome: &ExtractionOutcome) {
        match outcome {
            ExtractionOutcome::Completed(_) => self.completed += 1,
            ExtractionOutcome::Skipped(_) => self.skipped += 1,
            ExtractionOutcome::Failed(_) => self.failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.completed + self.skipped + self.failed
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} manifests: {} completed, {} skipped, {} failed",
            self.total(),
            self.completed,
            self.skipped,
            self.failed
        )
    }
}

/// Distributes extraction jobs across a fixed number of workers.
pub struct Scheduler<O: SlideOpener + 'static> {
    extractor: Arc<Extractor<O>>,
    workers: usize,
    timeout: Option<Duration>,
}

impl<O: SlideOpener + 'static> Scheduler<O> {
    /// Scheduler running at most `workers` invocations at once (minimum 1).
    pub fn new(extractor: Extractor<O>, workers: usize) -> Self {
        Self {
            extractor: Arc::new(extractor),
            workers: workers.max(1),
            timeout: None,
        }
    }

    /// Fail invocations that run longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Run every job to an outcome.
    ///
    /// Individual failures are logged and counted; they never stop the run.
    pub async fn run(&self, jobs: Vec<ExtractJob>) -> RunSummary {
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut join_set = JoinSet::new();

        info!(
            "Scheduling {} manifests on {} workers",
            jobs.len(),
            self.workers
        );

        for job in jobs {
            // The semaphore is never closed
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };
            let extractor = Arc::clone(&self.extractor);
            join_set.spawn(run_job(extractor, job, permit, self.timeout));
        }

        let mut summary = RunSummary::default();
        while let Some(result) = join_set.join_next().await {
            match result {
                Ok(outcome) => summary.record(&outcome),
                Err(e) => {
                    error!("Scheduler task failed: {}", e);
                    summary.failed += 1;
                }
            }
        }

        info!("Run complete: {}", summary);
        summary
    }
}

/// Run one job on a blocking thread that owns `permit` until it returns.
async fn run_job<O: SlideOpener + 'static>(
    extractor: Arc<Extractor<O>>,
    job: ExtractJob,
    permit: OwnedSemaphorePermit,
    timeout: Option<Duration>,
) -> ExtractionOutcome {
    let cancel = CancelFlag::new();
    let display_path = job.display_path().to_path_buf();
    debug!("Starting {}", display_path.display());

    let mut handle = tokio::task::spawn_blocking({
        let cancel = cancel.clone();
        move || {
            let _permit = permit;
            extractor.extract(&job, &cancel)
        }
    });

    let joined = match timeout {
        None => handle.await,
        Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
            Ok(joined) => joined,
            Err(_) => {
                if cancel.cancel() {
                    // The worker keeps its permit until it notices the flag
                    let err = ExtractError::Timeout { limit };
                    error!(slide = %display_path.display(), "Extraction failed: {}", err);
                    return ExtractionOutcome::Failed(err);
                }
                warn!(
                    slide = %display_path.display(),
                    "Deadline of {:?} passed while publishing, waiting for result", limit
                );
                handle.await
            }
        },
    };

    match joined {
        Ok(outcome) => outcome,
        Err(e) => {
            let err = ExtractError::WorkerPanicked(e.to_string());
            error!(slide = %display_path.display(), "Extraction failed: {}", err);
            ExtractionOutcome::Failed(err)
        }
    }
}
