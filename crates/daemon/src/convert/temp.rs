//! Scratch files that must not outlive the work that created them.

use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Removes the file on drop unless it was persisted.
///
/// Covers failed work as well as tasks aborted mid-flight, where no
/// cleanup code after an `.await` ever runs.
#[derive(Debug)]
pub struct TempOutput {
    path: PathBuf,
    armed: bool,
}

impl TempOutput {
    pub fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rename the file over `target`. On error the file is still removed.
    pub async fn persist(mut self, target: &Path) -> io::Result<()> {
        tokio::fs::rename(&self.path, target).await?;
        self.armed = false;
        Ok(())
    }
}

impl Drop for TempOutput {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Removed temp file"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to remove temp file"),
        }
    }
}
