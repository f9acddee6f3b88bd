//! One conversion attempt: transcode into a temp file, tag it, publish it.
//!
//! A final output file only ever appears through an atomic rename of a
//! fully written temp file in the same directory.

use super::temp::TempOutput;
use super::{ConvertError, EncodeSettings, Transcoder};
use crate::jobs::PendingJob;
use crate::tagging::MetadataWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Temp path next to `output`: `.tmp_{stem}_{micros}.{ext}`.
pub fn temp_path_for(output: &Path) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let micros = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros())
        .unwrap_or_default();
    let name = match output.extension() {
        Some(ext) => format!(".tmp_{}_{}.{}", stem, micros, ext.to_string_lossy()),
        None => format!(".tmp_{}_{}", stem, micros),
    };
    output.with_file_name(name)
}

/// Result of a successful attempt
#[derive(Debug, Clone)]
pub struct ConversionOutcome {
    pub output_path: PathBuf,
    pub output_bytes: u64,
    pub elapsed: Duration,
    pub tagged: bool,
}

/// Runs single conversion attempts.
pub struct ConversionWorker {
    transcoder: Arc<dyn Transcoder>,
    tagger: Arc<dyn MetadataWriter>,
    settings: EncodeSettings,
}

impl ConversionWorker {
    pub fn new(
        transcoder: Arc<dyn Transcoder>,
        tagger: Arc<dyn MetadataWriter>,
        settings: EncodeSettings,
    ) -> Self {
        Self {
            transcoder,
            tagger,
            settings,
        }
    }

    /// Perform one attempt for `job`.
    ///
    /// A missing input, before or after the transcoder runs, is reported as
    /// [`ConvertError::InputVanished`]. Tagging failures are logged and do
    /// not fail the attempt.
    pub async fn convert_once(&self, job: &PendingJob) -> Result<ConversionOutcome, ConvertError> {
        let started = Instant::now();

        if !input_exists(&job.input_path).await {
            return Err(ConvertError::InputVanished {
                path: job.input_path.clone(),
            });
        }

        if let Some(parent) = job.output_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| ConvertError::OutputDirectory {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        let temp = TempOutput::new(temp_path_for(&job.output_path));
        debug!(
            job = %job.id,
            transcoder = self.transcoder.name(),
            temp = %temp.path().display(),
            "Transcoding"
        );

        if let Err(e) = self
            .transcoder
            .transcode(&job.input_path, temp.path(), &self.settings)
            .await
        {
            if !input_exists(&job.input_path).await {
                return Err(ConvertError::InputVanished {
                    path: job.input_path.clone(),
                });
            }
            return Err(e);
        }

        let output_bytes = match tokio::fs::metadata(temp.path()).await {
            Ok(meta) => meta.len(),
            Err(_) => 0,
        };
        if output_bytes == 0 {
            return Err(ConvertError::EmptyOutput {
                path: temp.path().to_path_buf(),
            });
        }

        let tagged = match self
            .tagger
            .write_tags(temp.path(), self.settings.format, &job.metadata)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    job = %job.id,
                    path = %job.output_path.display(),
                    error = %e,
                    "Failed to embed metadata, keeping untagged output"
                );
                false
            }
        };

        let temp_path = temp.path().to_path_buf();
        temp.persist(&job.output_path)
            .await
            .map_err(|source| ConvertError::Rename {
                from: temp_path,
                to: job.output_path.clone(),
                source,
            })?;

        Ok(ConversionOutcome {
            output_path: job.output_path.clone(),
            output_bytes,
            elapsed: started.elapsed(),
            tagged,
        })
    }
}

async fn input_exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}
