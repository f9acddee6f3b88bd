//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// A value was present but could not be accepted
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
            ConfigError::Invalid { key, value, reason } => {
                write!(f, "Invalid value '{}' for {}: {}", value, key, reason)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

impl ConfigError {
    fn invalid(key: &'static str, value: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            key,
            value: value.into(),
            reason: reason.into(),
        }
    }
}

/// Audio container produced by the converter
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Lossy MP3 at a configured bitrate
    #[default]
    Mp3,
    /// Lossless FLAC at a configured bit depth
    Flac,
}

impl OutputFormat {
    /// File extension without the leading dot
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Mp3 => "mp3",
            OutputFormat::Flac => "flac",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mp3" => Ok(OutputFormat::Mp3),
            "flac" => Ok(OutputFormat::Flac),
            other => Err(format!("unsupported output format '{}' (expected mp3 or flac)", other)),
        }
    }
}

/// Log levels accepted in `LOG_LEVEL`
pub const LOG_LEVELS: &[&str] = &["DEBUG", "INFO", "WARN", "WARNING", "ERROR"];

/// Supported FLAC bit depths
pub const FLAC_BIT_DEPTHS: &[u8] = &[16, 24];

/// Main configuration structure
///
/// Every field has a default so a partial TOML file (or none at all) is valid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Root of the watched input tree
    pub input_dir: PathBuf,
    /// Root of the mirrored output tree
    pub output_dir: PathBuf,
    pub output_format: OutputFormat,
    /// MP3 bitrate in kbps
    pub mp3_bitrate: u32,
    /// FLAC sample bit depth (16 or 24)
    pub flac_bit_depth: u8,
    /// Prepended to every output file stem
    pub filename_prefix: String,
    /// Appended to every output file stem
    pub filename_postfix: String,
    /// Never claim a file whose output already exists
    pub skip_existing: bool,
    pub max_parallel_jobs: usize,
    pub stability_period_secs: u64,
    pub max_retries: u32,
    /// Base delay of the exponential retry backoff
    pub retry_delay_secs: u64,
    pub polling_interval_secs: u64,
    pub log_level: String,
    /// Port for the health/metrics HTTP server
    pub health_port: u16,
    /// How long in-flight conversions may run after a shutdown signal
    pub shutdown_grace_secs: u64,
    /// Transcoder binary
    pub ffmpeg_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("/input"),
            output_dir: PathBuf::from("/output"),
            output_format: OutputFormat::Mp3,
            mp3_bitrate: 320,
            flac_bit_depth: 16,
            filename_prefix: String::new(),
            filename_postfix: String::new(),
            skip_existing: true,
            max_parallel_jobs: 4,
            stability_period_secs: 30,
            max_retries: 3,
            retry_delay_secs: 60,
            polling_interval_secs: 10,
            log_level: "INFO".to_string(),
            health_port: 8080,
            shutdown_grace_secs: 30,
            ffmpeg_path: PathBuf::from("ffmpeg"),
        }
    }
}

fn parse_number<T: FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| ConfigError::invalid(key, value, "expected a non-negative integer"))
}

/// Accept "true", "1", "yes" as true; "false", "0", "no" as false
fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::invalid(key, value, "expected true or false")),
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply overrides from the process environment
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides_with(|key| env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup
    ///
    /// Keys are the upper-case environment names (`INPUT_DIR`, `MAX_RETRIES`, ...).
    /// Unlike a missing key, a present but unparsable value is an error.
    pub fn apply_overrides_with<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup("INPUT_DIR") {
            self.input_dir = PathBuf::from(val);
        }
        if let Some(val) = lookup("OUTPUT_DIR") {
            self.output_dir = PathBuf::from(val);
        }
        if let Some(val) = lookup("OUTPUT_FORMAT") {
            self.output_format = val
                .parse()
                .map_err(|reason: String| ConfigError::invalid("OUTPUT_FORMAT", &val, reason))?;
        }
        if let Some(val) = lookup("MP3_BITRATE") {
            self.mp3_bitrate = parse_number("MP3_BITRATE", &val)?;
        }
        if let Some(val) = lookup("FLAC_BIT_DEPTH") {
            self.flac_bit_depth = parse_number("FLAC_BIT_DEPTH", &val)?;
        }
        if let Some(val) = lookup("FILENAME_PREFIX") {
            self.filename_prefix = val;
        }
        if let Some(val) = lookup("FILENAME_POSTFIX") {
            self.filename_postfix = val;
        }
        if let Some(val) = lookup("SKIP_EXISTING") {
            self.skip_existing = parse_bool("SKIP_EXISTING", &val)?;
        }
        if let Some(val) = lookup("MAX_PARALLEL_JOBS") {
            self.max_parallel_jobs = parse_number("MAX_PARALLEL_JOBS", &val)?;
        }
        if let Some(val) = lookup("STABILITY_PERIOD_SECONDS") {
            self.stability_period_secs = parse_number("STABILITY_PERIOD_SECONDS", &val)?;
        }
        if let Some(val) = lookup("MAX_RETRIES") {
            self.max_retries = parse_number("MAX_RETRIES", &val)?;
        }
        if let Some(val) = lookup("RETRY_DELAY_SECONDS") {
            self.retry_delay_secs = parse_number("RETRY_DELAY_SECONDS", &val)?;
        }
        if let Some(val) = lookup("POLLING_INTERVAL_SECONDS") {
            self.polling_interval_secs = parse_number("POLLING_INTERVAL_SECONDS", &val)?;
        }
        if let Some(val) = lookup("LOG_LEVEL") {
            self.log_level = val.trim().to_uppercase();
        }
        if let Some(val) = lookup("HEALTH_PORT") {
            self.health_port = parse_number("HEALTH_PORT", &val)?;
        }
        if let Some(val) = lookup("SHUTDOWN_GRACE_SECONDS") {
            self.shutdown_grace_secs = parse_number("SHUTDOWN_GRACE_SECONDS", &val)?;
        }
        if let Some(val) = lookup("FFMPEG_PATH") {
            self.ffmpeg_path = PathBuf::from(val);
        }
        Ok(())
    }

    /// Check cross-field constraints; the daemon refuses to start on error.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.input_dir.as_os_str().is_empty() {
            return Err(ConfigError::invalid("INPUT_DIR", "", "must not be empty"));
        }
        if self.output_dir.as_os_str().is_empty() {
            return Err(ConfigError::invalid("OUTPUT_DIR", "", "must not be empty"));
        }
        if !(8..=320).contains(&self.mp3_bitrate) {
            return Err(ConfigError::invalid(
                "MP3_BITRATE",
                self.mp3_bitrate.to_string(),
                "must be between 8 and 320 kbps",
            ));
        }
        if !FLAC_BIT_DEPTHS.contains(&self.flac_bit_depth) {
            return Err(ConfigError::invalid(
                "FLAC_BIT_DEPTH",
                self.flac_bit_depth.to_string(),
                "must be 16 or 24",
            ));
        }
        if self.max_parallel_jobs == 0 {
            return Err(ConfigError::invalid("MAX_PARALLEL_JOBS", "0", "must be at least 1"));
        }
        if self.polling_interval_secs == 0 {
            return Err(ConfigError::invalid(
                "POLLING_INTERVAL_SECONDS",
                "0",
                "must be at least 1",
            ));
        }
        if !LOG_LEVELS.contains(&self.log_level.to_uppercase().as_str()) {
            return Err(ConfigError::invalid(
                "LOG_LEVEL",
                self.log_level.clone(),
                "expected DEBUG, INFO, WARN or ERROR",
            ));
        }
        Ok(())
    }

    /// Defaults overlaid with the process environment, validated
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Output file name for an input stem: prefix + stem + postfix + extension
    pub fn output_file_name(&self, stem: &str) -> String {
        format!(
            "{}{}{}.{}",
            self.filename_prefix,
            stem,
            self.filename_postfix,
            self.output_format.extension()
        )
    }

    /// `tracing` filter directive for the configured log level
    pub fn log_filter(&self) -> &'static str {
        match self.log_level.to_uppercase().as_str() {
            "DEBUG" => "debug",
            "WARN" | "WARNING" => "warn",
            "ERROR" => "error",
            _ => "info",
        }
    }

    pub fn stability_period(&self) -> Duration {
        Duration::from_secs(self.stability_period_secs)
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_secs(self.polling_interval_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}
