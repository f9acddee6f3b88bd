//! Embedding track metadata into finished audio files.

use crate::convert::stderr_tail;
use crate::convert::temp::TempOutput;
use crate::metadata::TrackMetadata;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use vidaud_config::OutputFormat;

#[derive(Debug, Error)]
pub enum TagError {
    #[error("Tag writer failed with exit code {code:?}: {diagnostic}")]
    ToolFailed {
        code: Option<i32>,
        diagnostic: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Writes tags into an audio file in place.
#[async_trait]
pub trait MetadataWriter: Send + Sync {
    async fn write_tags(
        &self,
        audio: &Path,
        format: OutputFormat,
        metadata: &TrackMetadata,
    ) -> Result<(), TagError>;
}

/// Sibling path used while rewriting `audio`; keeps the extension.
fn tagging_path_for(audio: &Path) -> PathBuf {
    let stem = audio
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match audio.extension() {
        Some(ext) => format!("{}.tagging.{}", stem, ext.to_string_lossy()),
        None => format!("{}.tagging", stem),
    };
    audio.with_file_name(name)
}

/// Remuxes the file through ffmpeg with `-metadata` arguments.
///
/// Streams are copied, never re-encoded. The rewritten file replaces the
/// original by rename.
#[derive(Debug, Clone)]
pub struct FfmpegTagWriter {
    ffmpeg_path: PathBuf,
}

impl FfmpegTagWriter {
    pub fn new(ffmpeg_path: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
        }
    }

    pub fn build_command(
        &self,
        audio: &Path,
        tagged: &Path,
        format: OutputFormat,
        metadata: &TrackMetadata,
    ) -> Command {
        let mut cmd = Command::new(&self.ffmpeg_path);
        cmd.arg("-hide_banner").arg("-nostdin").arg("-y");
        cmd.arg("-i").arg(audio);
        cmd.arg("-map").arg("0").arg("-c").arg("copy");
        cmd.args(metadata.to_ffmpeg_args());
        if format == OutputFormat::Mp3 {
            cmd.arg("-id3v2_version").arg("3");
        }
        cmd.arg(tagged);
        cmd
    }
}

#[async_trait]
impl MetadataWriter for FfmpegTagWriter {
    async fn write_tags(
        &self,
        audio: &Path,
        format: OutputFormat,
        metadata: &TrackMetadata,
    ) -> Result<(), TagError> {
        let tagged = TempOutput::new(tagging_path_for(audio));
        let mut cmd = self.build_command(audio, tagged.path(), format, metadata);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = cmd.spawn()?.wait_with_output().await?;
        if !output.status.success() {
            return Err(TagError::ToolFailed {
                code: output.status.code(),
                diagnostic: stderr_tail(&output.stderr, 5),
            });
        }
        tagged.persist(audio).await?;
        Ok(())
    }
}
