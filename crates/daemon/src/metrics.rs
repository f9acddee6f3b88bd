//! Pipeline counters
//!
//! Lock-free counters updated by the conversion pipeline and read by the
//! health server. Snapshots serialize to JSON.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Point-in-time view of the counters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsSnapshot {
    pub files_processed: u64,
    pub files_failed: u64,
    pub active_jobs: u64,
    pub pending_files: u64,
    /// Seconds spent in successful conversions
    pub total_processing_time: f64,
}

impl Default for MetricsSnapshot {
    fn default() -> Self {
        Self {
            files_processed: 0,
            files_failed: 0,
            active_jobs: 0,
            pending_files: 0,
            total_processing_time: 0.0,
        }
    }
}

#[derive(Debug)]
pub struct Metrics {
    files_processed: AtomicU64,
    files_failed: AtomicU64,
    active_jobs: AtomicU64,
    pending_files: AtomicU64,
    total_processing_micros: AtomicU64,
    live: AtomicBool,
    started_at: Instant,
}

/// Shared metrics state for concurrent access across daemon components
pub type SharedMetrics = Arc<Metrics>;

/// Creates a new SharedMetrics instance with zeroed counters
pub fn new_shared_metrics() -> SharedMetrics {
    Arc::new(Metrics::new())
}

fn decrement(counter: &AtomicU64, by: u64) {
    let _ = counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
        Some(v.saturating_sub(by))
    });
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            files_processed: AtomicU64::new(0),
            files_failed: AtomicU64::new(0),
            active_jobs: AtomicU64::new(0),
            pending_files: AtomicU64::new(0),
            total_processing_micros: AtomicU64::new(0),
            live: AtomicBool::new(true),
            started_at: Instant::now(),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            files_processed: self.files_processed.load(Ordering::SeqCst),
            files_failed: self.files_failed.load(Ordering::SeqCst),
            active_jobs: self.active_jobs.load(Ordering::SeqCst),
            pending_files: self.pending_files.load(Ordering::SeqCst),
            total_processing_time: self.total_processing_micros.load(Ordering::SeqCst) as f64
                / 1_000_000.0,
        }
    }

    /// A new candidate is being tracked, or a job went back to waiting.
    pub fn file_pending(&self) {
        self.pending_files.fetch_add(1, Ordering::SeqCst);
    }

    /// A waiting file left the queue without starting a conversion.
    pub fn file_dropped(&self) {
        decrement(&self.pending_files, 1);
    }

    pub fn files_dropped(&self, count: u64) {
        decrement(&self.pending_files, count);
    }

    /// A waiting job was admitted to a conversion slot.
    pub fn job_started(&self) {
        decrement(&self.pending_files, 1);
        self.active_jobs.fetch_add(1, Ordering::SeqCst);
    }

    pub fn job_finished(&self) {
        decrement(&self.active_jobs, 1);
    }

    pub fn record_success(&self, elapsed: Duration) {
        self.files_processed.fetch_add(1, Ordering::SeqCst);
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.total_processing_micros.fetch_add(micros, Ordering::SeqCst);
    }

    pub fn record_failure(&self) {
        self.files_failed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    pub fn set_live(&self, live: bool) {
        self.live.store(live, Ordering::SeqCst);
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_serialization() {
        let metrics = new_shared_metrics();
        metrics.file_pending();
        metrics.file_pending();
        metrics.job_started();
        metrics.record_success(Duration::from_millis(1500));
        metrics.record_failure();

        let json = serde_json::to_value(metrics.snapshot()).unwrap();
        assert_eq!(json["files_processed"], 1);
        assert_eq!(json["files_failed"], 1);
        assert_eq!(json["active_jobs"], 1);
        assert_eq!(json["pending_files"], 1);
        assert_eq!(json["total_processing_time"], 1.5);
    }

    #[test]
    fn test_counters_never_underflow() {
        let metrics = Metrics::new();
        metrics.file_dropped();
        metrics.job_finished();
        metrics.files_dropped(10);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.pending_files, 0);
        assert_eq!(snapshot.active_jobs, 0);
    }

    #[test]
    fn test_job_lifecycle_counters() {
        let metrics = Metrics::new();
        metrics.file_pending();
        metrics.job_started();
        assert_eq!(metrics.snapshot().active_jobs, 1);
        assert_eq!(metrics.snapshot().pending_files, 0);

        metrics.job_finished();
        metrics.file_pending();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.active_jobs, 0);
        assert_eq!(snapshot.pending_files, 1);
    }

    #[test]
    fn test_liveness_flag() {
        let metrics = Metrics::new();
        assert!(metrics.is_live());
        metrics.set_live(false);
        assert!(!metrics.is_live());
    }

    #[test]
    fn test_concurrent_updates() {
        let metrics = new_shared_metrics();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let metrics = metrics.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        metrics.record_success(Duration::from_micros(1));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.files_processed, 8000);
        assert!((snapshot.total_processing_time - 0.008).abs() < 1e-9);
    }
}
