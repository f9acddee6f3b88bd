//! ffmpeg-backed transcoder
//!
//! Builds and executes the ffmpeg command that drops the video stream and
//! encodes the audio into the configured format.

use super::{stderr_tail, ConvertError, EncodeSettings, Transcoder};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;
use vidaud_config::OutputFormat;

/// Lines of stderr kept on failure
const STDERR_TAIL_LINES: usize = 20;

/// Codec arguments for the requested output format.
///
/// mp3 is encoded with LAME at a constant bitrate. flac uses an integer
/// sample format matching the bit depth; 24-bit samples are carried in a
/// 32-bit container with 24 significant bits.
pub fn codec_args(settings: &EncodeSettings) -> Vec<String> {
    match settings.format {
        OutputFormat::Mp3 => vec![
            "-c:a".to_string(),
            "libmp3lame".to_string(),
            "-b:a".to_string(),
            format!("{}k", settings.mp3_bitrate),
        ],
        OutputFormat::Flac => {
            let mut args = vec!["-c:a".to_string(), "flac".to_string(), "-sample_fmt".to_string()];
            if settings.flac_bit_depth > 16 {
                args.push("s32".to_string());
                args.push("-bits_per_raw_sample".to_string());
                args.push(settings.flac_bit_depth.to_string());
            } else {
                args.push("s16".to_string());
            }
            args
        }
    }
}

/// Build the ffmpeg command for one conversion
///
/// Creates a Command configured with:
/// - No interactive input and overwrite of the temp target
/// - Video stream dropped, source tags stripped
/// - Codec arguments for the output format
pub fn build_ffmpeg_command(
    ffmpeg_path: &Path,
    input: &Path,
    output: &Path,
    settings: &EncodeSettings,
) -> Command {
    let mut cmd = Command::new(ffmpeg_path);

    cmd.arg("-hide_banner").arg("-nostdin").arg("-y");
    cmd.arg("-i").arg(input);

    // Audio only, without tags inherited from the container
    cmd.arg("-vn");
    cmd.arg("-map_metadata").arg("-1");

    cmd.args(codec_args(settings));

    cmd.arg(output);
    cmd
}

/// Transcoder running an external ffmpeg binary
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    ffmpeg_path: PathBuf,
}

impl FfmpegTranscoder {
    pub fn new(ffmpeg_path: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
        }
    }
}

impl Default for FfmpegTranscoder {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        settings: &EncodeSettings,
    ) -> Result<(), ConvertError> {
        let mut cmd = build_ffmpeg_command(&self.ffmpeg_path, input, output, settings);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(input = %input.display(), output = %output.display(), "Spawning ffmpeg");

        let child = cmd.spawn().map_err(|e| match e.kind() {
            ErrorKind::NotFound => ConvertError::TranscoderNotFound {
                path: self.ffmpeg_path.clone(),
            },
            _ => ConvertError::Io(e),
        })?;

        let result = child.wait_with_output().await?;

        if result.status.success() {
            Ok(())
        } else {
            Err(ConvertError::TranscoderFailed {
                code: result.status.code(),
                diagnostic: stderr_tail(&result.stderr, STDERR_TAIL_LINES),
            })
        }
    }
}
