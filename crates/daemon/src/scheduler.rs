//! Job scheduler
//!
//! Runs claimed jobs with at most `max_parallel_jobs` attempts in flight.
//! Each job is a task that holds its claim until it reaches a terminal
//! state. Every attempt waits for a permit from a FIFO semaphore, so jobs
//! are admitted in submission order and a job sleeping between retries does
//! not occupy a slot.

use crate::convert::ConversionWorker;
use crate::dedup::{ClaimRefusal, DedupGuard};
use crate::jobs::{JobState, PendingJob};
use crate::metrics::SharedMetrics;
use crate::retry::{RetryDecision, RetryPolicy};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use tracing::{error, info, warn};
use vidaud_config::Config;

/// How a job left the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded,
    /// Retries exhausted
    Failed,
    /// The input vanished; not counted as a failure
    Dropped,
    /// Stopped by shutdown before its next attempt
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct JobReport {
    pub id: String,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub outcome: JobOutcome,
    pub attempts: u32,
    pub last_error: Option<String>,
}

/// Releases the claim on drop, including when the task is aborted.
struct ClaimGuard {
    dedup: DedupGuard,
    input: PathBuf,
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        self.dedup.release(&self.input);
    }
}

/// A held conversion slot; keeps `active_jobs` in step with the permit.
struct ActiveSlot {
    _permit: OwnedSemaphorePermit,
    metrics: SharedMetrics,
}

impl ActiveSlot {
    fn new(permit: OwnedSemaphorePermit, metrics: SharedMetrics) -> Self {
        metrics.job_started();
        Self {
            _permit: permit,
            metrics,
        }
    }
}

impl Drop for ActiveSlot {
    fn drop(&mut self) {
        self.metrics.job_finished();
    }
}

#[derive(Clone)]
struct JobContext {
    semaphore: Arc<Semaphore>,
    worker: Arc<ConversionWorker>,
    retry: RetryPolicy,
    metrics: SharedMetrics,
    shutdown: watch::Receiver<bool>,
}

/// Resolves once shutdown has been requested.
async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Job scheduler that runs conversions with concurrency limiting
pub struct JobScheduler {
    semaphore: Arc<Semaphore>,
    worker: Arc<ConversionWorker>,
    retry: RetryPolicy,
    dedup: DedupGuard,
    metrics: SharedMetrics,
    shutdown_tx: watch::Sender<bool>,
    tasks: JoinSet<JobReport>,
}

impl JobScheduler {
    pub fn new(
        config: &Config,
        worker: ConversionWorker,
        dedup: DedupGuard,
        metrics: SharedMetrics,
    ) -> Self {
        Self::with_limits(
            config.max_parallel_jobs,
            RetryPolicy::from_config(config),
            Arc::new(worker),
            dedup,
            metrics,
        )
    }

    pub fn with_limits(
        max_parallel_jobs: usize,
        retry: RetryPolicy,
        worker: Arc<ConversionWorker>,
        dedup: DedupGuard,
        metrics: SharedMetrics,
    ) -> Self {
        let max_parallel_jobs = max_parallel_jobs.max(1);
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            semaphore: Arc::new(Semaphore::new(max_parallel_jobs)),
            worker,
            retry,
            dedup,
            metrics,
            shutdown_tx,
            tasks: JoinSet::new(),
        }
    }

    /// Free conversion slots
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Jobs not yet collected, running or waiting
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    pub fn dedup(&self) -> &DedupGuard {
        &self.dedup
    }

    /// Claim the job's input and start driving it.
    ///
    /// The job runs in its own task: it waits for a slot, converts, and
    /// retries on failure until it succeeds, gives up or is cancelled.
    ///
    /// # Arguments
    /// * `job` - A job for a stable input; its output path decides skip-existing
    ///
    /// # Returns
    /// * `Ok(())` - The claim is held and the job task is spawned
    /// * `Err(ClaimRefusal::InFlight)` - Another job holds the input
    /// * `Err(ClaimRefusal::OutputExists)` - Skip-existing is on and the output exists
    ///
    /// Nothing is started when the claim is refused.
    pub fn submit(&mut self, job: PendingJob) -> Result<(), ClaimRefusal> {
        self.dedup.claim(&job.input_path, &job.output_path)?;
        let claim = ClaimGuard {
            dedup: self.dedup.clone(),
            input: job.input_path.clone(),
        };
        let ctx = JobContext {
            semaphore: self.semaphore.clone(),
            worker: self.worker.clone(),
            retry: self.retry,
            metrics: self.metrics.clone(),
            shutdown: self.shutdown_tx.subscribe(),
        };
        self.tasks.spawn(async move {
            let _claim = claim;
            run_job(ctx, job).await
        });
        Ok(())
    }

    /// Collect jobs that have already finished, without waiting.
    pub fn reap_finished(&mut self) -> Vec<JobReport> {
        let mut reports = Vec::new();
        while let Some(result) = self.tasks.try_join_next() {
            reports.extend(collect(result));
        }
        reports
    }

    /// Wait until every submitted job has finished.
    pub async fn wait_idle(&mut self) -> Vec<JobReport> {
        let mut reports = Vec::new();
        while let Some(result) = self.tasks.join_next().await {
            reports.extend(collect(result));
        }
        reports
    }

    /// Stop admitting attempts and wait up to `grace` for running ones.
    ///
    /// Jobs waiting for a slot or a retry are cancelled at once. Attempts
    /// still running after `grace` are aborted; their transcoder processes
    /// are killed and temp files removed.
    ///
    /// # Arguments
    /// * `grace` - How long running attempts may take to finish
    ///
    /// # Returns
    /// Reports for every job that ended on its own, cancelled ones included.
    /// Aborted jobs have no report.
    pub async fn shutdown(mut self, grace: Duration) -> Vec<JobReport> {
        self.shutdown_tx.send_replace(true);
        if !self.tasks.is_empty() {
            info!(
                in_flight = self.tasks.len(),
                grace_secs = grace.as_secs_f64(),
                "Waiting for in-flight conversions"
            );
        }

        let mut reports = Vec::new();
        let drained = tokio::time::timeout(grace, async {
            while let Some(result) = self.tasks.join_next().await {
                reports.extend(collect(result));
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                remaining = self.tasks.len(),
                "Grace period elapsed, aborting remaining conversions"
            );
            self.tasks.abort_all();
            while let Some(result) = self.tasks.join_next().await {
                reports.extend(collect(result));
            }
        }
        reports
    }
}

fn collect(result: Result<JobReport, JoinError>) -> Option<JobReport> {
    match result {
        Ok(report) => Some(report),
        Err(e) if e.is_cancelled() => None,
        Err(e) => {
            error!(error = %e, "Conversion task panicked");
            None
        }
    }
}

/// Drive one job through attempts and retries to a terminal state.
async fn run_job(mut ctx: JobContext, mut job: PendingJob) -> JobReport {
    let mut last_error: Option<String> = None;

    let outcome = loop {
        let permit = tokio::select! {
            biased;
            _ = wait_for_shutdown(&mut ctx.shutdown) => break JobOutcome::Cancelled,
            permit = ctx.semaphore.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break JobOutcome::Cancelled,
            },
        };

        let slot = ActiveSlot::new(permit, ctx.metrics.clone());
        job.attempts += 1;
        job.state = JobState::Converting;
        info!(
            job = %job.id,
            input = %job.input_path.display(),
            attempt = job.attempts,
            max_attempts = ctx.retry.max_attempts(),
            "Converting"
        );

        let result = ctx.worker.convert_once(&job).await;
        drop(slot);

        let err = match result {
            Ok(done) => {
                job.state = JobState::Succeeded;
                ctx.metrics.record_success(done.elapsed);
                info!(
                    job = %job.id,
                    output = %done.output_path.display(),
                    bytes = done.output_bytes,
                    elapsed_secs = done.elapsed.as_secs_f64(),
                    tagged = done.tagged,
                    "Conversion complete"
                );
                break JobOutcome::Succeeded;
            }
            Err(e) => e,
        };
        last_error = Some(err.to_string());

        if !err.is_retryable() {
            info!(job = %job.id, error = %err, "Input vanished, dropping job");
            break JobOutcome::Dropped;
        }

        match ctx.retry.on_failure(job.attempts, Instant::now()) {
            RetryDecision::GiveUp => {
                job.state = JobState::Failed;
                ctx.metrics.record_failure();
                error!(
                    job = %job.id,
                    input = %job.input_path.display(),
                    attempts = job.attempts,
                    state = %job.state,
                    error = %err,
                    "Conversion failed permanently"
                );
                break JobOutcome::Failed;
            }
            RetryDecision::RetryAt(wake_at) => {
                job.state = JobState::AwaitingRetry { wake_at };
                ctx.metrics.file_pending();
                warn!(
                    job = %job.id,
                    input = %job.input_path.display(),
                    attempt = job.attempts,
                    state = %job.state,
                    retry_in_secs = wake_at.saturating_duration_since(Instant::now()).as_secs_f64(),
                    error = %err,
                    "Conversion attempt failed, will retry"
                );
                tokio::select! {
                    biased;
                    _ = wait_for_shutdown(&mut ctx.shutdown) => break JobOutcome::Cancelled,
                    _ = tokio::time::sleep_until(wake_at) => {}
                }
            }
        }
    };

    if outcome == JobOutcome::Cancelled {
        ctx.metrics.file_dropped();
        info!(job = %job.id, attempts = job.attempts, "Job cancelled by shutdown");
    }

    JobReport {
        id: job.id,
        input_path: job.input_path,
        output_path: job.output_path,
        outcome,
        attempts: job.attempts,
        last_error,
    }
}
