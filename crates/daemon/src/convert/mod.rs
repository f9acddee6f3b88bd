//! Conversion modules: the external transcoder seam and the per-job worker.

pub mod ffmpeg;
pub(crate) mod temp;
pub mod worker;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;
use vidaud_config::{Config, OutputFormat};

pub use ffmpeg::{build_ffmpeg_command, FfmpegTranscoder};
pub use worker::{temp_path_for, ConversionOutcome, ConversionWorker};

/// Error type for a single conversion attempt
#[derive(Debug, Error)]
pub enum ConvertError {
    /// The input disappeared between discovery and conversion
    #[error("Input file vanished: {path}")]
    InputVanished { path: PathBuf },

    /// The transcoder binary could not be started
    #[error("Transcoder not found at path: {path}")]
    TranscoderNotFound { path: PathBuf },

    /// The transcoder exited unsuccessfully
    #[error("Transcoder failed with exit code {code:?}: {diagnostic}")]
    TranscoderFailed {
        code: Option<i32>,
        diagnostic: String,
    },

    /// The transcoder reported success but produced nothing
    #[error("Transcoder produced no output at {path}")]
    EmptyOutput { path: PathBuf },

    /// Failed to create the output directory
    #[error("Failed to create output directory {path}: {source}")]
    OutputDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to move the finished file into place
    #[error("Failed to rename {from} to {to}: {source}")]
    Rename {
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },

    /// IO error during conversion
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConvertError {
    /// Whether another attempt could succeed.
    ///
    /// A vanished input is a filesystem race, not a failure: it is dropped
    /// without retry and without counting against the failure metrics.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ConvertError::InputVanished { .. })
    }
}

/// Audio encoding parameters passed to the transcoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeSettings {
    pub format: OutputFormat,
    /// kbps, used for mp3
    pub mp3_bitrate: u32,
    /// bits per sample, used for flac
    pub flac_bit_depth: u8,
}

impl EncodeSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            format: config.output_format,
            mp3_bitrate: config.mp3_bitrate,
            flac_bit_depth: config.flac_bit_depth,
        }
    }
}

impl Default for EncodeSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// The external engine that turns a video file into an audio file.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Returns the name of this transcoder implementation.
    fn name(&self) -> &str;

    /// Strip the video stream of `input` and encode its audio into `output`.
    ///
    /// `output` keeps the target extension so the engine can detect the
    /// container format from it.
    async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        settings: &EncodeSettings,
    ) -> Result<(), ConvertError>;
}

/// Keep the last `max_lines` lines of a tool's stderr for diagnostics.
pub(crate) fn stderr_tail(stderr: &[u8], max_lines: usize) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(max_lines);
    lines[start..].join("\n")
}
