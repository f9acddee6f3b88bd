//! Scanner module for discovering video files under the input root.
//!
//! Classification is by extension only; file contents are never read here.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Video file extensions accepted as conversion input (case-insensitive matching).
pub const VIDEO_EXTENSIONS: &[&str] = &[".mkv", ".webm", ".mp4", ".avi", ".mov", ".wmv"];

/// A candidate video file observed by the scanner or the watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateFile {
    /// Full path to the video file.
    pub path: PathBuf,
    /// File size in bytes at observation time.
    pub size_bytes: u64,
    /// Last modified time of the file at observation time.
    pub modified_time: SystemTime,
    /// When this path was first seen.
    pub first_seen: Instant,
}

impl CandidateFile {
    /// Stat `path` and build a fresh observation of it.
    pub fn observe(path: &Path) -> io::Result<Self> {
        let metadata = fs::metadata(path)?;
        Ok(Self::from_metadata(path.to_path_buf(), &metadata))
    }

    /// Async variant of [`CandidateFile::observe`] for use on runtime threads.
    pub async fn observe_async(path: &Path) -> io::Result<Self> {
        let metadata = tokio::fs::metadata(path).await?;
        Ok(Self::from_metadata(path.to_path_buf(), &metadata))
    }

    fn from_metadata(path: PathBuf, metadata: &fs::Metadata) -> Self {
        Self {
            path,
            size_bytes: metadata.len(),
            modified_time: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            first_seen: Instant::now(),
        }
    }
}

/// Checks if a file has a supported video extension (case-insensitive).
pub fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext_lower = format!(".{}", ext.to_lowercase());
            VIDEO_EXTENSIONS.contains(&ext_lower.as_str())
        })
        .unwrap_or(false)
}

/// Recursively walks `root` and returns every regular video file found.
///
/// Entries that cannot be read (permission errors, files vanishing mid-walk)
/// are logged and skipped; a later filesystem event may bring them back.
pub fn scan_tree(root: &Path) -> Vec<CandidateFile> {
    use walkdir::WalkDir;

    let mut candidates = Vec::new();

    if !root.exists() {
        warn!(root = %root.display(), "scan root does not exist");
        return candidates;
    }

    for entry in WalkDir::new(root) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "skipping unreadable entry during scan");
                continue;
            }
        };

        if !entry.file_type().is_file() || !is_video_file(entry.path()) {
            continue;
        }

        match entry.metadata() {
            Ok(metadata) => {
                candidates.push(CandidateFile::from_metadata(
                    entry.path().to_path_buf(),
                    &metadata,
                ));
            }
            Err(e) => {
                debug!(path = %entry.path().display(), error = %e, "could not stat file");
            }
        }
    }

    candidates
}
