//! Filesystem watching for the input root.
//!
//! Notify events arrive on a backend thread and are forwarded into the
//! runtime, where they are turned into [`CandidateFile`] observations.
//! A directory created or moved into the tree is scanned recursively, so
//! files that landed before the watch on it was armed are not missed.

use crate::scan::{is_video_file, scan_tree, CandidateFile};
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Raw notify events queued ahead of the forwarding task
const RAW_EVENT_BUFFER: usize = 256;

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("Watch root does not exist: {0}")]
    MissingRoot(PathBuf),

    #[error("Failed to watch directory: {0}")]
    Notify(#[from] notify::Error),
}

/// Paths of an event that may name a new or changed input.
///
/// Removals, reads and metadata-only changes carry nothing. For a rename
/// only the destination counts.
pub fn candidate_paths(event: &Event) -> Vec<PathBuf> {
    match &event.kind {
        EventKind::Create(_) => event.paths.clone(),
        EventKind::Modify(ModifyKind::Metadata(_)) => Vec::new(),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => Vec::new(),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            event.paths.last().cloned().into_iter().collect()
        }
        EventKind::Modify(_) => event.paths.clone(),
        _ => Vec::new(),
    }
}

/// Watches one directory tree.
#[derive(Debug, Clone)]
pub struct DirectoryWatcher {
    root: PathBuf,
}

/// Keeps the OS watch and the forwarding task alive.
///
/// Dropping the handle stops both; the candidate channel then closes.
pub struct WatchHandle {
    _watcher: RecommendedWatcher,
    forwarder: JoinHandle<()>,
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.forwarder.abort();
    }
}

impl DirectoryWatcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Every video file currently under the root.
    pub fn scan(&self) -> Vec<CandidateFile> {
        scan_tree(&self.root)
    }

    /// Start delivering candidates for create/modify/move events to `tx`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn subscribe(&self, tx: mpsc::Sender<CandidateFile>) -> Result<WatchHandle, WatchError> {
        if !self.root.is_dir() {
            return Err(WatchError::MissingRoot(self.root.clone()));
        }

        let (raw_tx, mut raw_rx) = mpsc::channel(RAW_EVENT_BUFFER);
        let mut watcher = RecommendedWatcher::new(event_sender(raw_tx), notify::Config::default())?;
        watcher.watch(&self.root, RecursiveMode::Recursive)?;

        let forwarder = tokio::spawn(async move {
            while let Some(result) = raw_rx.recv().await {
                let event = match result {
                    Ok(event) => event,
                    Err(e) => {
                        warn!(error = %e, "Filesystem watch error");
                        continue;
                    }
                };
                for path in candidate_paths(&event) {
                    if !forward_path(&path, &tx).await {
                        debug!("Candidate receiver closed, stopping watcher");
                        return;
                    }
                }
            }
        });

        Ok(WatchHandle {
            _watcher: watcher,
            forwarder,
        })
    }
}

/// Notify callback feeding the forwarding task.
///
/// Runs on the notify backend thread, never on a runtime thread, so it may
/// block. A full queue stalls the backend until the forwarder catches up.
fn event_sender(
    raw_tx: mpsc::Sender<notify::Result<Event>>,
) -> impl FnMut(notify::Result<Event>) + Send + 'static {
    move |result| {
        // Closed once the handle is dropped.
        let _ = raw_tx.blocking_send(result);
    }
}

/// Send the candidates found at `path`. Returns false once `tx` is closed.
async fn forward_path(path: &Path, tx: &mpsc::Sender<CandidateFile>) -> bool {
    let metadata = match tokio::fs::metadata(path).await {
        Ok(metadata) => metadata,
        // Gone again already; nothing to track.
        Err(_) => return true,
    };

    if metadata.is_dir() {
        let dir = path.to_path_buf();
        let found = tokio::task::spawn_blocking(move || scan_tree(&dir))
            .await
            .unwrap_or_default();
        debug!(dir = %path.display(), count = found.len(), "Scanned new directory");
        for candidate in found {
            if tx.send(candidate).await.is_err() {
                return false;
            }
        }
        return true;
    }

    if !is_video_file(path) {
        return true;
    }
    match CandidateFile::observe_async(path).await {
        Ok(candidate) => tx.send(candidate).await.is_ok(),
        Err(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, DataChange, MetadataKind, RemoveKind};
    use std::time::Duration;
    use tempfile::TempDir;

    fn event(kind: EventKind, paths: &[&str]) -> Event {
        let mut event = Event::new(kind);
        for p in paths {
            event = event.add_path(PathBuf::from(p));
        }
        event
    }

    #[test]
    fn test_create_and_modify_are_candidates() {
        let e = event(EventKind::Create(CreateKind::File), &["/in/a.mkv"]);
        assert_eq!(candidate_paths(&e), vec![PathBuf::from("/in/a.mkv")]);

        let e = event(
            EventKind::Modify(ModifyKind::Data(DataChange::Any)),
            &["/in/a.mkv"],
        );
        assert_eq!(candidate_paths(&e), vec![PathBuf::from("/in/a.mkv")]);
    }

    #[test]
    fn test_rename_uses_destination() {
        let e = event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &["/in/partial.download", "/in/final.mp4"],
        );
        assert_eq!(candidate_paths(&e), vec![PathBuf::from("/in/final.mp4")]);

        let e = event(
            EventKind::Modify(ModifyKind::Name(RenameMode::To)),
            &["/in/final.mp4"],
        );
        assert_eq!(candidate_paths(&e), vec![PathBuf::from("/in/final.mp4")]);

        let e = event(
            EventKind::Modify(ModifyKind::Name(RenameMode::From)),
            &["/in/old.mp4"],
        );
        assert!(candidate_paths(&e).is_empty());
    }

    #[test]
    fn test_ignored_events() {
        for kind in [
            EventKind::Remove(RemoveKind::File),
            EventKind::Access(AccessKind::Any),
            EventKind::Modify(ModifyKind::Metadata(MetadataKind::AccessTime)),
        ] {
            assert!(candidate_paths(&event(kind, &["/in/a.mkv"])).is_empty());
        }
    }

    #[tokio::test]
    async fn test_event_sender_waits_for_room() {
        let (raw_tx, mut raw_rx) = mpsc::channel(1);
        let backend = std::thread::spawn(move || {
            let mut send = event_sender(raw_tx);
            for name in ["a.mkv", "b.mkv", "c.mkv"] {
                send(Ok(event(EventKind::Create(CreateKind::File), &[name])));
            }
        });

        let mut received = Vec::new();
        while let Some(result) = raw_rx.recv().await {
            received.push(result.unwrap().paths[0].clone());
        }
        backend.join().unwrap();
        assert_eq!(
            received,
            vec![PathBuf::from("a.mkv"), PathBuf::from("b.mkv"), PathBuf::from("c.mkv")]
        );
    }

    #[test]
    fn test_event_sender_ignores_closed_queue() {
        let (raw_tx, raw_rx) = mpsc::channel(1);
        drop(raw_rx);
        let mut send = event_sender(raw_tx);
        send(Ok(event(EventKind::Create(CreateKind::File), &["a.mkv"])));
        send(Ok(event(EventKind::Create(CreateKind::File), &["b.mkv"])));
    }

    #[test]
    fn test_subscribe_requires_existing_root() {
        let (tx, _rx) = mpsc::channel(8);
        let watcher = DirectoryWatcher::new("/nonexistent/vidaud/input");
        assert!(matches!(watcher.subscribe(tx), Err(WatchError::MissingRoot(_))));
    }

    #[tokio::test]
    async fn test_forward_path_filters_and_scans_directories() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("Album");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("one.mkv"), b"v").unwrap();
        std::fs::write(nested.join("cover.jpg"), b"i").unwrap();
        let (tx, mut rx) = mpsc::channel(8);

        assert!(forward_path(&nested.join("cover.jpg"), &tx).await);
        assert!(forward_path(&dir.path().join("missing.mkv"), &tx).await);
        assert!(forward_path(&nested, &tx).await);
        drop(tx);

        let mut received = Vec::new();
        while let Some(candidate) = rx.recv().await {
            received.push(candidate.path);
        }
        assert_eq!(received, vec![nested.join("one.mkv")]);
    }

    #[tokio::test]
    async fn test_watch_delivers_new_video_files() {
        let dir = TempDir::new().unwrap();
        let (tx, mut rx) = mpsc::channel(64);
        let watcher = DirectoryWatcher::new(dir.path());
        let _handle = watcher.subscribe(tx).unwrap();

        let path = dir.path().join("new clip.mp4");
        std::fs::write(&path, b"video").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"text").unwrap();

        let candidate = tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let c = rx.recv().await.expect("watcher channel closed");
                if c.path.file_name() == path.file_name() {
                    break c;
                }
            }
        })
        .await
        .expect("no event for new file");
        assert!(is_video_file(&candidate.path));
    }
}
