//! Claim registry guaranteeing at most one in-flight conversion per input path.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Why a claim was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimRefusal {
    /// Another job already holds the path.
    InFlight,
    /// Skip-existing is on and the output file is already present.
    OutputExists,
}

/// Process-local claim set.
///
/// `try_claim` is the single serialization point: every job must hold a
/// claim on its input path before starting work.
#[derive(Debug, Clone)]
pub struct DedupGuard {
    claims: Arc<Mutex<HashSet<PathBuf>>>,
    skip_existing: bool,
}

impl DedupGuard {
    pub fn new(skip_existing: bool) -> Self {
        Self {
            claims: Arc::new(Mutex::new(HashSet::new())),
            skip_existing,
        }
    }

    /// Atomically claim `input` for conversion into `output`.
    pub fn try_claim(&self, input: &Path, output: &Path) -> bool {
        self.claim(input, output).is_ok()
    }

    /// Like [`DedupGuard::try_claim`] but reports why a claim was refused.
    pub fn claim(&self, input: &Path, output: &Path) -> Result<(), ClaimRefusal> {
        let mut claims = self.lock();
        if claims.contains(input) {
            return Err(ClaimRefusal::InFlight);
        }
        // Output check and insert happen under the same lock.
        if self.skip_existing && output.exists() {
            return Err(ClaimRefusal::OutputExists);
        }
        claims.insert(input.to_path_buf());
        Ok(())
    }

    /// Drop the claim on `input`, whatever the outcome of its job.
    pub fn release(&self, input: &Path) {
        self.lock().remove(input);
    }

    pub fn is_claimed(&self, input: &Path) -> bool {
        self.lock().contains(input)
    }

    pub fn active_claims(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<PathBuf>> {
        self.claims.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    #[test]
    fn test_claim_and_release() {
        let guard = DedupGuard::new(false);
        let input = Path::new("/input/video.mp4");
        let output = Path::new("/output/video.mp3");

        assert!(guard.try_claim(input, output));
        assert!(guard.is_claimed(input));
        assert_eq!(guard.claim(input, output), Err(ClaimRefusal::InFlight));

        guard.release(input);
        assert!(!guard.is_claimed(input));
        assert!(guard.try_claim(input, output));
    }

    #[test]
    fn test_skip_existing_refuses_when_output_present() {
        let temp_dir = TempDir::new().unwrap();
        let output = temp_dir.path().join("video.mp3");
        std::fs::write(&output, b"audio").unwrap();
        let input = temp_dir.path().join("video.mp4");

        let guard = DedupGuard::new(true);
        assert_eq!(guard.claim(&input, &output), Err(ClaimRefusal::OutputExists));
        assert_eq!(guard.active_claims(), 0);

        let guard = DedupGuard::new(false);
        assert!(guard.try_claim(&input, &output));
    }

    #[test]
    fn test_concurrent_claims_grant_exactly_one() {
        let guard = DedupGuard::new(false);
        let granted = Arc::new(AtomicUsize::new(0));
        let input = PathBuf::from("/input/race.mkv");
        let output = PathBuf::from("/output/race.mp3");

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let guard = guard.clone();
                let granted = granted.clone();
                let input = input.clone();
                let output = output.clone();
                std::thread::spawn(move || {
                    if guard.try_claim(&input, &output) {
                        granted.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(granted.load(Ordering::SeqCst), 1);
    }
}
