//! Conversion jobs and their lifecycle states.

use crate::metadata::{extract_metadata, TrackMetadata};
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::time::Instant;
use uuid::Uuid;
use vidaud_config::Config;

/// Lifecycle of one input file through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Stable and claimed; waiting for a conversion slot.
    Claimed,
    /// An attempt is running.
    Converting,
    /// The last attempt failed; sleeping until `wake_at`.
    AwaitingRetry { wake_at: Instant },
    /// Output written. Terminal.
    Succeeded,
    /// Retries exhausted. Terminal.
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Claimed => "claimed",
            JobState::Converting => "converting",
            JobState::AwaitingRetry { .. } => "awaiting_retry",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stable, claimed input file and everything needed to convert it.
#[derive(Debug, Clone)]
pub struct PendingJob {
    /// Short identifier used in log lines.
    pub id: String,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    /// Attempts started so far.
    pub attempts: u32,
    pub state: JobState,
    pub metadata: TrackMetadata,
}

impl PendingJob {
    pub fn new(input_path: PathBuf, output_path: PathBuf, metadata: TrackMetadata) -> Self {
        let id = Uuid::new_v4().simple().to_string()[..8].to_string();
        Self {
            id,
            input_path,
            output_path,
            attempts: 0,
            state: JobState::Claimed,
            metadata,
        }
    }

    /// Build a job for `input_path`, deriving output path and tags from config.
    pub fn for_input(config: &Config, input_path: PathBuf) -> Self {
        let output_path = output_path_for(config, &input_path);
        let metadata = extract_metadata(&input_path);
        Self::new(input_path, output_path, metadata)
    }
}

/// Mirror `input_path`'s location under the output root.
///
/// The stem gets the configured prefix/postfix and the output extension.
/// A path outside the input root keeps only its file name.
pub fn output_path_for(config: &Config, input_path: &Path) -> PathBuf {
    let relative = input_path
        .strip_prefix(&config.input_dir)
        .unwrap_or_else(|_| Path::new(input_path.file_name().unwrap_or_default()));

    let stem = relative
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let file_name = config.output_file_name(&stem);

    match relative.parent() {
        Some(parent) => config.output_dir.join(parent).join(file_name),
        None => config.output_dir.join(file_name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use vidaud_config::OutputFormat;

    fn config() -> Config {
        Config {
            input_dir: PathBuf::from("/input"),
            output_dir: PathBuf::from("/output"),
            ..Config::default()
        }
    }

    #[test]
    fn test_output_path_mirrors_structure() {
        let path = output_path_for(&config(), Path::new("/input/AlbumName/Artist - Song Title.mp4"));
        assert_eq!(path, PathBuf::from("/output/AlbumName/Artist - Song Title.mp3"));
    }

    #[test]
    fn test_output_path_with_prefix_postfix_and_flac() {
        let cfg = Config {
            filename_prefix: "conv_".to_string(),
            filename_postfix: "_audio".to_string(),
            output_format: OutputFormat::Flac,
            ..config()
        };
        let path = output_path_for(&cfg, Path::new("/input/a/b/clip.webm"));
        assert_eq!(path, PathBuf::from("/output/a/b/conv_clip_audio.flac"));
    }

    #[test]
    fn test_output_path_outside_input_root() {
        let path = output_path_for(&config(), Path::new("/elsewhere/deep/clip.mkv"));
        assert_eq!(path, PathBuf::from("/output/clip.mp3"));
    }

    #[test]
    fn test_output_path_keeps_dots_in_stem() {
        let path = output_path_for(&config(), Path::new("/input/Band.Live.2024.mkv"));
        assert_eq!(path, PathBuf::from("/output/Band.Live.2024.mp3"));
    }

    #[test]
    fn test_for_input_builds_metadata() {
        let job = PendingJob::for_input(
            &config(),
            PathBuf::from("/input/AlbumName/Artist - Song Title.mp4"),
        );
        assert_eq!(job.state, JobState::Claimed);
        assert_eq!(job.attempts, 0);
        assert_eq!(job.metadata.title, "Song Title");
        assert_eq!(job.metadata.artist, "Artist");
        assert_eq!(job.metadata.album, "AlbumName");
        assert_eq!(job.id.len(), 8);
    }

    #[test]
    fn test_state_names() {
        assert_eq!(JobState::Claimed.to_string(), "claimed");
        assert_eq!(JobState::Converting.to_string(), "converting");
        assert_eq!(
            JobState::AwaitingRetry { wake_at: Instant::now() }.to_string(),
            "awaiting_retry"
        );
        assert_eq!(JobState::Failed.to_string(), "failed");
    }

    proptest! {
        #[test]
        fn prop_output_path_stays_under_output_root(
            dirs in proptest::collection::vec("[a-zA-Z0-9 _-]{1,10}", 0..4),
            stem in "[a-zA-Z0-9 _-]{1,20}",
            ext in prop_oneof![Just("mkv"), Just("mp4"), Just("webm")],
        ) {
            let mut input = PathBuf::from("/input");
            for d in &dirs {
                input.push(d);
            }
            input.push(format!("{}.{}", stem, ext));

            let out = output_path_for(&config(), &input);
            prop_assert!(out.starts_with("/output"));
            prop_assert_eq!(out.extension().and_then(|e| e.to_str()), Some("mp3"));
            let rel_in = input.strip_prefix("/input").unwrap().parent().unwrap().to_path_buf();
            let rel_out = out.strip_prefix("/output").unwrap().parent().unwrap().to_path_buf();
            prop_assert_eq!(rel_in, rel_out);
        }
    }
}
