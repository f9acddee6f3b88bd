//! Stability checking module for verifying files are not being written to.
//!
//! Before processing a file, we verify it's stable (not being written to)
//! by checking that its size and modification time remain unchanged across
//! a configurable stability period. Sampling happens on the polling interval
//! so idle storage is allowed to stay idle.

use crate::scan::CandidateFile;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Result of a stability check on a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StabilityStatus {
    /// Size and mtime unchanged for at least the stability period.
    Stable,
    /// The file changed recently (or is still empty).
    StillWriting,
    /// The path no longer exists; stop tracking it.
    Vanished,
}

/// Compare two observations of the same file.
///
/// This is a pure function extracted for property testing.
#[inline]
pub fn observations_match(
    previous: (u64, SystemTime),
    current: (u64, SystemTime),
) -> bool {
    previous == current
}

/// A candidate under observation plus the instant its current size/mtime
/// were first seen.
#[derive(Debug, Clone)]
pub struct TrackedCandidate {
    pub candidate: CandidateFile,
    pub unchanged_since: Instant,
}

impl TrackedCandidate {
    pub fn new(candidate: CandidateFile) -> Self {
        let unchanged_since = candidate.first_seen;
        Self {
            candidate,
            unchanged_since,
        }
    }

    fn fingerprint(&self) -> (u64, SystemTime) {
        (self.candidate.size_bytes, self.candidate.modified_time)
    }

    /// Record a new observation. Returns true if the file changed, in which
    /// case the stability window restarts at `now`.
    pub fn refresh(&mut self, size_bytes: u64, modified_time: SystemTime, now: Instant) -> bool {
        if observations_match(self.fingerprint(), (size_bytes, modified_time)) {
            return false;
        }
        self.candidate.size_bytes = size_bytes;
        self.candidate.modified_time = modified_time;
        self.unchanged_since = now;
        true
    }
}

/// Decides whether a tracked candidate has finished being written.
#[derive(Debug, Clone)]
pub struct StabilityChecker {
    period: Duration,
}

impl StabilityChecker {
    pub fn new(period: Duration) -> Self {
        Self { period }
    }

    /// Decide stability from an observation taken at `now`.
    ///
    /// `observation` is `None` when the path no longer exists.
    pub fn evaluate(
        &self,
        tracked: &mut TrackedCandidate,
        observation: Option<(u64, SystemTime)>,
        now: Instant,
    ) -> StabilityStatus {
        let Some((size_bytes, modified_time)) = observation else {
            return StabilityStatus::Vanished;
        };

        if tracked.refresh(size_bytes, modified_time, now) {
            return StabilityStatus::StillWriting;
        }

        // An empty file has nothing to convert yet.
        if size_bytes == 0 {
            return StabilityStatus::StillWriting;
        }

        if now.saturating_duration_since(tracked.unchanged_since) >= self.period {
            StabilityStatus::Stable
        } else {
            StabilityStatus::StillWriting
        }
    }

    /// Stat the candidate's path and decide its stability.
    pub async fn is_stable(&self, tracked: &mut TrackedCandidate) -> StabilityStatus {
        let observation = match stat(&tracked.candidate.path).await {
            Ok(observation) => Some(observation),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!(path = %tracked.candidate.path.display(), error = %e, "cannot stat candidate, dropping it");
                None
            }
        };
        self.evaluate(tracked, observation, Instant::now())
    }
}

async fn stat(path: &Path) -> io::Result<(u64, SystemTime)> {
    let metadata = tokio::fs::metadata(path).await?;
    Ok((
        metadata.len(),
        metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
    ))
}

/// Outcome of feeding an observation into the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    /// The path was not tracked before.
    New,
    /// Already tracked; size or mtime changed and the window restarted.
    Refreshed,
    /// Already tracked with identical size and mtime.
    Unchanged,
}

/// Result of one polling sweep over all tracked candidates.
#[derive(Debug, Default)]
pub struct Sweep {
    /// Stable candidates, earliest-stabilized first. Removed from tracking.
    pub stable: Vec<TrackedCandidate>,
    /// Paths that disappeared. Removed from tracking.
    pub vanished: Vec<PathBuf>,
}

/// The set of candidates that are being watched until they stabilize.
#[derive(Debug, Default)]
pub struct CandidateTracker {
    candidates: HashMap<PathBuf, TrackedCandidate>,
}

impl CandidateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a candidate, coalescing repeated observations of the same path.
    pub fn upsert(&mut self, candidate: CandidateFile) -> Upsert {
        match self.candidates.get_mut(&candidate.path) {
            Some(tracked) => {
                let now = Instant::now();
                if tracked.refresh(candidate.size_bytes, candidate.modified_time, now) {
                    Upsert::Refreshed
                } else {
                    Upsert::Unchanged
                }
            }
            None => {
                self.candidates
                    .insert(candidate.path.clone(), TrackedCandidate::new(candidate));
                Upsert::New
            }
        }
    }

    /// Put a candidate taken out by [`CandidateTracker::sweep`] back under
    /// observation, keeping its stability window.
    ///
    /// Returns false if the path is already tracked again; the newer entry
    /// is kept.
    pub fn requeue(&mut self, tracked: TrackedCandidate) -> bool {
        match self.candidates.entry(tracked.candidate.path.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(tracked);
                true
            }
        }
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.candidates.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Forget every tracked candidate, returning how many were dropped.
    pub fn clear(&mut self) -> usize {
        let dropped = self.candidates.len();
        self.candidates.clear();
        dropped
    }

    /// Sample every tracked candidate once.
    pub async fn sweep(&mut self, checker: &StabilityChecker) -> Sweep {
        let mut sweep = Sweep::default();
        let mut stable_paths = Vec::new();

        for (path, tracked) in self.candidates.iter_mut() {
            match checker.is_stable(tracked).await {
                StabilityStatus::Stable => stable_paths.push(path.clone()),
                StabilityStatus::Vanished => sweep.vanished.push(path.clone()),
                StabilityStatus::StillWriting => {
                    debug!(path = %path.display(), size = tracked.candidate.size_bytes, "still being written");
                }
            }
        }

        for path in &sweep.vanished {
            self.candidates.remove(path);
        }
        for path in stable_paths {
            if let Some(tracked) = self.candidates.remove(&path) {
                sweep.stable.push(tracked);
            }
        }
        sweep.stable.sort_by_key(|t| t.unchanged_since);

        sweep
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::TempDir;

    fn candidate(path: &str, size: u64, mtime_secs: u64) -> CandidateFile {
        CandidateFile {
            path: PathBuf::from(path),
            size_bytes: size,
            modified_time: SystemTime::UNIX_EPOCH + Duration::from_secs(mtime_secs),
            first_seen: Instant::now(),
        }
    }

    fn obs(size: u64, mtime_secs: u64) -> Option<(u64, SystemTime)> {
        Some((size, SystemTime::UNIX_EPOCH + Duration::from_secs(mtime_secs)))
    }

    proptest! {
        #[test]
        fn prop_observations_match_iff_equal(
            size_a: u64, size_b: u64, mtime_a in 0u64..1_000_000, mtime_b in 0u64..1_000_000,
        ) {
            let a = (size_a, SystemTime::UNIX_EPOCH + Duration::from_secs(mtime_a));
            let b = (size_b, SystemTime::UNIX_EPOCH + Duration::from_secs(mtime_b));
            prop_assert_eq!(observations_match(a, b), size_a == size_b && mtime_a == mtime_b);
        }
    }

    #[test]
    fn test_unchanged_file_becomes_stable_after_period() {
        let checker = StabilityChecker::new(Duration::from_secs(30));
        let mut tracked = TrackedCandidate::new(candidate("/in/a.mkv", 100, 1));
        let start = tracked.unchanged_since;

        let status = checker.evaluate(&mut tracked, obs(100, 1), start + Duration::from_secs(10));
        assert_eq!(status, StabilityStatus::StillWriting);

        let status = checker.evaluate(&mut tracked, obs(100, 1), start + Duration::from_secs(30));
        assert_eq!(status, StabilityStatus::Stable);
    }

    #[test]
    fn test_growing_file_restarts_window() {
        let checker = StabilityChecker::new(Duration::from_secs(30));
        let mut tracked = TrackedCandidate::new(candidate("/in/a.mkv", 100, 1));
        let start = tracked.unchanged_since;

        // Size changes on every poll: never stable, no matter how long.
        for i in 1..20u64 {
            let now = start + Duration::from_secs(i * 10);
            let status = checker.evaluate(&mut tracked, obs(100 + i, 1 + i), now);
            assert_eq!(status, StabilityStatus::StillWriting);
            assert_eq!(tracked.unchanged_since, now);
        }

        let last = tracked.unchanged_since;
        let status = checker.evaluate(&mut tracked, obs(119, 20), last + Duration::from_secs(29));
        assert_eq!(status, StabilityStatus::StillWriting);
        let status = checker.evaluate(&mut tracked, obs(119, 20), last + Duration::from_secs(30));
        assert_eq!(status, StabilityStatus::Stable);
    }

    #[test]
    fn test_mtime_change_alone_restarts_window() {
        let checker = StabilityChecker::new(Duration::from_secs(5));
        let mut tracked = TrackedCandidate::new(candidate("/in/a.mkv", 100, 1));
        let start = tracked.unchanged_since;

        let status = checker.evaluate(&mut tracked, obs(100, 2), start + Duration::from_secs(60));
        assert_eq!(status, StabilityStatus::StillWriting);
    }

    #[test]
    fn test_empty_file_never_stable() {
        let checker = StabilityChecker::new(Duration::from_secs(1));
        let mut tracked = TrackedCandidate::new(candidate("/in/a.mkv", 0, 1));
        let start = tracked.unchanged_since;

        let status = checker.evaluate(&mut tracked, obs(0, 1), start + Duration::from_secs(3600));
        assert_eq!(status, StabilityStatus::StillWriting);
    }

    #[test]
    fn test_missing_observation_is_vanished() {
        let checker = StabilityChecker::new(Duration::from_secs(1));
        let mut tracked = TrackedCandidate::new(candidate("/in/a.mkv", 10, 1));
        assert_eq!(
            checker.evaluate(&mut tracked, None, Instant::now()),
            StabilityStatus::Vanished
        );
    }

    #[test]
    fn test_upsert_coalesces_repeated_observations() {
        let mut tracker = CandidateTracker::new();
        assert_eq!(tracker.upsert(candidate("/in/a.mkv", 10, 1)), Upsert::New);
        assert_eq!(tracker.upsert(candidate("/in/a.mkv", 10, 1)), Upsert::Unchanged);
        assert_eq!(tracker.upsert(candidate("/in/a.mkv", 20, 2)), Upsert::Refreshed);
        assert_eq!(tracker.len(), 1);
        assert!(tracker.contains(Path::new("/in/a.mkv")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_reports_stable_and_vanished() {
        let temp_dir = TempDir::new().unwrap();
        let kept = temp_dir.path().join("kept.mkv");
        let gone = temp_dir.path().join("gone.mkv");
        std::fs::write(&kept, b"video bytes").unwrap();
        std::fs::write(&gone, b"video bytes").unwrap();

        let mut tracker = CandidateTracker::new();
        tracker.upsert(CandidateFile::observe(&kept).unwrap());
        tracker.upsert(CandidateFile::observe(&gone).unwrap());
        std::fs::remove_file(&gone).unwrap();

        let checker = StabilityChecker::new(Duration::from_secs(30));
        let sweep = tracker.sweep(&checker).await;
        assert!(sweep.stable.is_empty());
        assert_eq!(sweep.vanished, vec![gone]);
        assert_eq!(tracker.len(), 1);

        tokio::time::advance(Duration::from_secs(31)).await;
        let sweep = tracker.sweep(&checker).await;
        assert_eq!(sweep.stable.len(), 1);
        assert_eq!(sweep.stable[0].candidate.path, kept);
        assert!(tracker.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_requeued_candidate_is_offered_again() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("busy.mkv");
        std::fs::write(&path, b"video bytes").unwrap();

        let mut tracker = CandidateTracker::new();
        tracker.upsert(CandidateFile::observe(&path).unwrap());
        tokio::time::advance(Duration::from_secs(31)).await;

        let checker = StabilityChecker::new(Duration::from_secs(30));
        let mut sweep = tracker.sweep(&checker).await;
        let taken = sweep.stable.pop().unwrap();
        let since = taken.unchanged_since;
        assert!(tracker.is_empty());

        assert!(tracker.requeue(taken.clone()));
        assert!(!tracker.requeue(taken));
        assert_eq!(tracker.len(), 1);

        let sweep = tracker.sweep(&checker).await;
        assert_eq!(sweep.stable.len(), 1);
        assert_eq!(sweep.stable[0].unchanged_since, since);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_orders_by_stabilization_time() {
        let temp_dir = TempDir::new().unwrap();
        let mut tracker = CandidateTracker::new();
        let paths: Vec<PathBuf> = (0..3)
            .map(|i| temp_dir.path().join(format!("clip{}.mp4", i)))
            .collect();

        // Discover in reverse order, one second apart.
        for path in paths.iter().rev() {
            std::fs::write(path, b"data").unwrap();
            tracker.upsert(CandidateFile::observe(path).unwrap());
            tokio::time::advance(Duration::from_secs(1)).await;
        }

        tokio::time::advance(Duration::from_secs(60)).await;
        let checker = StabilityChecker::new(Duration::from_secs(30));
        let sweep = tracker.sweep(&checker).await;

        let order: Vec<PathBuf> = sweep.stable.into_iter().map(|t| t.candidate.path).collect();
        let expected: Vec<PathBuf> = paths.into_iter().rev().collect();
        assert_eq!(order, expected);
    }
}
