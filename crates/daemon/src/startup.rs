//! Startup checks
//!
//! Preflight checks run before the pipeline starts:
//! - ffmpeg is runnable and reports a version
//! - the input root exists and the output root can be created

use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::process::Command;
use tracing::info;
use vidaud_config::Config;

/// Error types for startup checks
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("ffmpeg not available at {path}: {reason}")]
    FfmpegUnavailable { path: PathBuf, reason: String },

    #[error("Input directory does not exist: {0}")]
    MissingInputDir(PathBuf),

    #[error("Failed to create output directory {path}: {source}")]
    OutputDir {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Parse FFmpeg version string and extract major version number
///
/// Handles various FFmpeg version formats:
/// - Standard: "ffmpeg version 7.1 ..."
/// - N-prefixed: "ffmpeg version n7.1-... ..."
pub fn parse_ffmpeg_version(version_output: &str) -> Option<u32> {
    let version_line = version_output
        .lines()
        .find(|line| line.to_lowercase().contains("ffmpeg version"))?;

    let version_part = version_line
        .to_lowercase()
        .split("ffmpeg version")
        .nth(1)?
        .split_whitespace()
        .next()?
        .to_string();

    let major_str = version_part
        .trim_start_matches('n')
        .split(|c| c == '.' || c == '-')
        .next()?;

    major_str.parse().ok()
}

/// Check that `ffmpeg_path -version` runs and report its first line
pub async fn check_ffmpeg_available(ffmpeg_path: &Path) -> Result<String, StartupError> {
    let unavailable = |reason: String| StartupError::FfmpegUnavailable {
        path: ffmpeg_path.to_path_buf(),
        reason,
    };

    let output = Command::new(ffmpeg_path)
        .arg("-version")
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| unavailable(format!("failed to run -version: {}", e)))?;

    if !output.status.success() {
        return Err(unavailable(format!(
            "-version exited with {}",
            output.status
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let first_line = stdout.lines().next().unwrap_or_default().to_string();
    match parse_ffmpeg_version(&stdout) {
        Some(major) => info!(major, version = %first_line, "Found ffmpeg"),
        None => info!(version = %first_line, "Found ffmpeg with unrecognised version string"),
    }
    Ok(first_line)
}

/// Verify the input root exists and create the output root
pub fn prepare_directories(config: &Config) -> Result<(), StartupError> {
    if !config.input_dir.is_dir() {
        return Err(StartupError::MissingInputDir(config.input_dir.clone()));
    }
    std::fs::create_dir_all(&config.output_dir).map_err(|source| StartupError::OutputDir {
        path: config.output_dir.clone(),
        source,
    })?;
    Ok(())
}

/// Run all startup checks in order
///
/// 1. Directories
/// 2. ffmpeg availability
///
/// # Arguments
/// * `config` - Supplies the input and output roots and the ffmpeg path
///
/// # Errors
/// * `StartupError::MissingInputDir` - The input root is not a directory
/// * `StartupError::OutputDir` - The output root could not be created
/// * `StartupError::FfmpegUnavailable` - `ffmpeg -version` did not run cleanly
pub async fn run_startup_checks(config: &Config) -> Result<(), StartupError> {
    prepare_directories(config)?;
    check_ffmpeg_available(&config.ffmpeg_path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::TempDir;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_ffmpeg_version_parsing_standard(
            major in 1u32..20,
            minor in 0u32..10,
            patch in 0u32..10,
        ) {
            let version_output = format!(
                "ffmpeg version {}.{}.{} Copyright (c) 2000-2024 the FFmpeg developers",
                major, minor, patch
            );
            prop_assert_eq!(parse_ffmpeg_version(&version_output), Some(major));
        }

        #[test]
        fn prop_ffmpeg_version_parsing_n_prefixed(
            major in 1u32..20,
            minor in 0u32..10,
            git_hash in "[a-f0-9]{7}",
        ) {
            let version_output = format!(
                "ffmpeg version n{}.{}-123-g{} Copyright (c) 2000-2024",
                major, minor, git_hash
            );
            prop_assert_eq!(parse_ffmpeg_version(&version_output), Some(major));
        }
    }

    #[test]
    fn test_parse_ffmpeg_version_multiline() {
        let output = "ffmpeg version 6.1.1-3ubuntu5 Copyright (c) 2000-2023\nbuilt with gcc 13\nconfiguration: --enable-gpl";
        assert_eq!(parse_ffmpeg_version(output), Some(6));
    }

    #[test]
    fn test_parse_ffmpeg_version_invalid() {
        assert_eq!(parse_ffmpeg_version(""), None);
        assert_eq!(parse_ffmpeg_version("not ffmpeg output"), None);
        assert_eq!(parse_ffmpeg_version("ffmpeg version N-113-gabc"), None);
    }

    #[test]
    fn test_prepare_directories_creates_output() {
        let dir = TempDir::new().unwrap();
        let config = Config {
            input_dir: dir.path().to_path_buf(),
            output_dir: dir.path().join("out").join("nested"),
            ..Config::default()
        };
        prepare_directories(&config).unwrap();
        assert!(config.output_dir.is_dir());
    }

    #[test]
    fn test_prepare_directories_requires_input() {
        let dir = TempDir::new().unwrap();
        let config = Config {
            input_dir: dir.path().join("missing"),
            output_dir: dir.path().join("out"),
            ..Config::default()
        };
        assert!(matches!(
            prepare_directories(&config),
            Err(StartupError::MissingInputDir(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_ffmpeg_is_reported() {
        let err = check_ffmpeg_available(Path::new("/nonexistent/ffmpeg-vidaud-test"))
            .await
            .unwrap_err();
        assert!(matches!(err, StartupError::FfmpegUnavailable { .. }));
    }
}
