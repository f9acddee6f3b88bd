//! Daemon main loop
//!
//! Wires the watcher, stability tracking, claims, scheduler and metrics
//! together and runs them until shutdown.

use crate::convert::{ConversionWorker, EncodeSettings, FfmpegTranscoder, Transcoder};
use crate::dedup::{ClaimRefusal, DedupGuard};
use crate::jobs::PendingJob;
use crate::metrics::{new_shared_metrics, SharedMetrics};
use crate::metrics_server::run_metrics_server;
use crate::scan::CandidateFile;
use crate::scheduler::JobScheduler;
use crate::stability::{CandidateTracker, StabilityChecker, Upsert};
use crate::startup::StartupError;
use crate::tagging::{FfmpegTagWriter, MetadataWriter};
use crate::watcher::{DirectoryWatcher, WatchError};
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};
use vidaud_config::{Config, ConfigError};

/// Candidates buffered between the watcher and the main loop
const CANDIDATE_BUFFER: usize = 1024;

/// Error type for daemon operations
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Startup check failed
    #[error("Startup check failed: {0}")]
    Startup(#[from] StartupError),

    /// The input root could not be watched
    #[error("Watcher error: {0}")]
    Watch(#[from] WatchError),
}

/// Daemon state containing all runtime components
pub struct Daemon {
    /// Configuration loaded from file and environment
    pub config: Config,
    metrics: SharedMetrics,
    watcher: DirectoryWatcher,
    checker: StabilityChecker,
    tracker: CandidateTracker,
    scheduler: JobScheduler,
}

impl Daemon {
    /// Build a daemon around the given transcoder and tag writer.
    pub fn new(
        config: Config,
        transcoder: Arc<dyn Transcoder>,
        tagger: Arc<dyn MetadataWriter>,
    ) -> Self {
        let metrics = new_shared_metrics();
        metrics.set_live(false);
        let worker = ConversionWorker::new(transcoder, tagger, EncodeSettings::from_config(&config));
        let scheduler = JobScheduler::new(
            &config,
            worker,
            DedupGuard::new(config.skip_existing),
            metrics.clone(),
        );

        Self {
            watcher: DirectoryWatcher::new(config.input_dir.clone()),
            checker: StabilityChecker::new(config.stability_period()),
            tracker: CandidateTracker::new(),
            scheduler,
            metrics,
            config,
        }
    }

    /// Build a daemon that converts and tags with the configured ffmpeg.
    pub fn with_ffmpeg(config: Config) -> Self {
        let transcoder = Arc::new(FfmpegTranscoder::new(config.ffmpeg_path.clone()));
        let tagger = Arc::new(FfmpegTagWriter::new(config.ffmpeg_path.clone()));
        Self::new(config, transcoder, tagger)
    }

    /// Get the shared metrics
    pub fn metrics(&self) -> SharedMetrics {
        self.metrics.clone()
    }

    fn track(&mut self, candidate: CandidateFile) {
        let path = candidate.path.clone();
        match self.tracker.upsert(candidate) {
            Upsert::New => {
                self.metrics.file_pending();
                debug!(path = %path.display(), "Tracking new candidate");
            }
            Upsert::Refreshed => debug!(path = %path.display(), "Candidate changed, stability window restarted"),
            Upsert::Unchanged => {}
        }
    }

    /// Sample tracked candidates and hand stable ones to the scheduler,
    /// earliest-stabilized first.
    ///
    /// A stable file whose previous conversion still holds the claim stays
    /// tracked and counted as pending. It is offered again on every tick
    /// until the claim is released.
    async fn dispatch_stable(&mut self) {
        self.scheduler.reap_finished();

        let sweep = self.tracker.sweep(&self.checker).await;
        for path in &sweep.vanished {
            self.metrics.file_dropped();
            debug!(path = %path.display(), "Candidate vanished before it stabilized");
        }

        for tracked in sweep.stable {
            let input = tracked.candidate.path.clone();
            let job = PendingJob::for_input(&self.config, input.clone());
            match self.scheduler.submit(job) {
                Ok(()) => debug!(path = %input.display(), "Queued for conversion"),
                Err(ClaimRefusal::InFlight) => {
                    debug!(path = %input.display(), "Still being converted, will retry after it finishes");
                    if !self.tracker.requeue(tracked) {
                        self.metrics.file_dropped();
                    }
                }
                Err(ClaimRefusal::OutputExists) => {
                    self.metrics.file_dropped();
                    info!(path = %input.display(), "Output already exists, skipping");
                }
            }
        }
    }

    /// Run the pipeline until `shutdown` resolves.
    ///
    /// Sequence:
    /// 1. Start watching the input root
    /// 2. Scan the tree for files that were already there
    /// 3. Mark the daemon live
    /// 4. Track candidates from the watcher and sweep them on the polling
    ///    interval, submitting stable ones
    /// 5. On shutdown, drop unstabilized candidates and stop the scheduler
    ///
    /// The stability sweep only runs while candidates are tracked.
    ///
    /// # Arguments
    /// * `shutdown` - Resolves when the daemon should stop
    ///
    /// # Returns
    /// * `Ok(())` - Shutdown completed
    /// * `Err(DaemonError::Watch)` - The input root is missing or cannot be watched
    pub async fn run<F>(mut self, shutdown: F) -> Result<(), DaemonError>
    where
        F: Future<Output = ()>,
    {
        let (tx, mut rx) = mpsc::channel(CANDIDATE_BUFFER);
        let watch = self.watcher.subscribe(tx)?;

        let watcher = self.watcher.clone();
        let initial = tokio::task::spawn_blocking(move || watcher.scan())
            .await
            .unwrap_or_default();
        info!(
            input = %self.config.input_dir.display(),
            found = initial.len(),
            "Initial scan complete"
        );
        for candidate in initial {
            self.track(candidate);
        }
        self.metrics.set_live(true);

        let mut ticker = tokio::time::interval(self.config.polling_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut watching = true;
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
                candidate = rx.recv(), if watching => match candidate {
                    Some(candidate) => self.track(candidate),
                    None => {
                        error!("Filesystem watcher stopped");
                        self.metrics.set_live(false);
                        watching = false;
                    }
                },
                _ = ticker.tick(), if !self.tracker.is_empty() => self.dispatch_stable().await,
            }
        }

        self.metrics.set_live(false);
        drop(watch);
        let dropped = self.tracker.clear();
        if dropped > 0 {
            self.metrics.files_dropped(dropped as u64);
            info!(dropped, "Dropped candidates that had not stabilized");
        }

        let reports = self.scheduler.shutdown(self.config.shutdown_grace()).await;
        info!(collected = reports.len(), "Pipeline stopped");
        Ok(())
    }

    /// Run the pipeline with the health server alongside it.
    ///
    /// A health server that fails to bind is logged; the pipeline keeps
    /// running without it.
    pub async fn run_with_server<F>(self, shutdown: F) -> Result<(), DaemonError>
    where
        F: Future<Output = ()>,
    {
        let metrics = self.metrics();
        let port = self.config.health_port;
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            let stop = async {
                let _ = stop_rx.await;
            };
            if let Err(e) = run_metrics_server(metrics, port, stop).await {
                error!(error = %e, "Health server stopped");
            }
        });

        let result = self.run(shutdown).await;

        let _ = stop_tx.send(());
        let _ = server.await;
        result
    }
}

/// Wait for Ctrl+C or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
