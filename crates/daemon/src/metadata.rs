//! Best-effort track metadata derived from file and directory names.

use serde::{Deserialize, Serialize};
use std::path::Path;

pub const UNKNOWN_ARTIST: &str = "Unknown Artist";

/// Tags embedded into every converted file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackMetadata {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub track: String,
}

impl TrackMetadata {
    /// `-metadata key=value` pairs for ffmpeg.
    pub fn to_ffmpeg_args(&self) -> Vec<String> {
        [
            ("title", &self.title),
            ("artist", &self.artist),
            ("album", &self.album),
            ("track", &self.track),
        ]
        .into_iter()
        .flat_map(|(key, value)| ["-metadata".to_string(), format!("{}={}", key, value)])
        .collect()
    }
}

fn looks_like_track_number(s: &str) -> bool {
    let all_digits = !s.is_empty() && s.chars().all(|c| c.is_ascii_digit());
    all_digits || (s.chars().count() == 2 && s.starts_with('0'))
}

/// Derive tags from `path`.
///
/// Recognised stems:
/// - `Artist - Title`
/// - `07 - Title` (the left side is a track number)
/// - `07 Title`, `07. Title`
///
/// Anything else becomes the title. The parent directory names the album.
/// Never fails.
pub fn extract_metadata(path: &Path) -> TrackMetadata {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let album = path
        .parent()
        .and_then(|p| p.file_name())
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut metadata = TrackMetadata {
        title: stem.clone(),
        artist: UNKNOWN_ARTIST.to_string(),
        album,
        track: "1".to_string(),
    };

    if let Some((left, right)) = stem.split_once(" - ") {
        let left = left.trim();
        metadata.title = right.trim().to_string();
        if looks_like_track_number(left) {
            metadata.track = left.to_string();
        } else {
            metadata.artist = left.to_string();
        }
    } else if stem.starts_with('0') && stem.chars().count() > 2 {
        let split = stem.char_indices().nth(2).map(|(i, _)| i).unwrap_or(stem.len());
        let (track, rest) = stem.split_at(split);
        metadata.track = track.to_string();
        metadata.title = rest
            .trim_start_matches(|c: char| matches!(c, ' ' | '-' | '_' | '.'))
            .to_string();
    }

    metadata
}
