//! vidaud
//!
//! Watches a directory tree for video files and converts each one into an
//! audio file once it has finished arriving, mirroring the directory layout
//! under the output root and tagging the result from its path.

pub mod convert;
pub mod daemon;
pub mod dedup;
pub mod jobs;
pub mod logging;
pub mod metadata;
pub mod metrics;
pub mod metrics_server;
pub mod retry;
pub mod scan;
pub mod scheduler;
pub mod stability;
pub mod startup;
pub mod tagging;
pub mod watcher;

pub use vidaud_config as config;
pub use vidaud_config::{Config, ConfigError, OutputFormat};
pub use convert::{
    build_ffmpeg_command, ConversionOutcome, ConversionWorker, ConvertError, EncodeSettings,
    FfmpegTranscoder, Transcoder,
};
pub use daemon::{shutdown_signal, Daemon, DaemonError};
pub use dedup::{ClaimRefusal, DedupGuard};
pub use jobs::{output_path_for, JobState, PendingJob};
pub use logging::init_logging;
pub use metadata::{extract_metadata, TrackMetadata};
pub use metrics::{new_shared_metrics, Metrics, MetricsSnapshot, SharedMetrics};
pub use metrics_server::{create_metrics_router, run_metrics_server, ServerError};
pub use retry::{RetryDecision, RetryPolicy};
pub use scan::{is_video_file, scan_tree, CandidateFile, VIDEO_EXTENSIONS};
pub use scheduler::{JobOutcome, JobReport, JobScheduler};
pub use stability::{CandidateTracker, StabilityChecker, StabilityStatus};
pub use startup::{
    check_ffmpeg_available, parse_ffmpeg_version, prepare_directories, run_startup_checks,
    StartupError,
};
pub use tagging::{FfmpegTagWriter, MetadataWriter, TagError};
pub use watcher::{DirectoryWatcher, WatchError, WatchHandle};
