use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info};

/// Prefix dropped from directory names when deriving display names
const DISPLAY_NAME_PREFIX: &str = "NCS_";

/// Extension shared by every stem file on disk
pub const STEM_FILE_EXTENSION: &str = "mp3";

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Failed to read audio directory {}: {source}", .path.display())]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// One of the four separated stems every track must provide
///
/// The serialized form is the kind name used as the key of a track's `stems`
/// map. The on-disk suffix (also the key used in stream URLs) differs for
/// melody, which is stored as `other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StemKind {
    Bass,
    Drums,
    Melody,
    Vocals,
}

impl StemKind {
    pub const ALL: [StemKind; 4] = [
        StemKind::Bass,
        StemKind::Drums,
        StemKind::Melody,
        StemKind::Vocals,
    ];

    /// Filename suffix, also the wire key in `/api/audio/{track}/{key}`
    pub fn file_suffix(&self) -> &'static str {
        match self {
            StemKind::Bass => "bass",
            StemKind::Drums => "drums",
            StemKind::Melody => "other",
            StemKind::Vocals => "vocals",
        }
    }

    /// Resolve a wire key (`bass`, `drums`, `other`, `vocals`) to its stem kind
    pub fn from_file_suffix(suffix: &str) -> Option<StemKind> {
        StemKind::ALL
            .into_iter()
            .find(|kind| kind.file_suffix() == suffix)
    }

    /// File name of this stem inside the track directory, e.g. `Song_bass.mp3`
    pub fn file_name(&self, track_id: &str) -> String {
        format!(
            "{}_{}.{}",
            track_id,
            self.file_suffix(),
            STEM_FILE_EXTENSION
        )
    }

    /// Path of this stem for a track under the audio root
    pub fn file_path(&self, audio_dir: &Path, track_id: &str) -> PathBuf {
        audio_dir.join(track_id).join(self.file_name(track_id))
    }

    /// URL the stem is streamed from
    pub fn stream_url(&self, track_id: &str) -> String {
        format!(
            "/api/audio/{}/{}",
            urlencoding::encode(track_id),
            self.file_suffix()
        )
    }
}

/// A track with all four stems present, as listed by `/api/tracks`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackDescriptor {
    /// Directory name
    pub id: String,
    /// Display name derived from the directory name
    pub name: String,
    pub stems: BTreeMap<StemKind, String>,
}

impl TrackDescriptor {
    fn new(track_id: &str) -> Self {
        let stems = StemKind::ALL
            .into_iter()
            .map(|kind| (kind, kind.stream_url(track_id)))
            .collect();

        TrackDescriptor {
            id: track_id.to_string(),
            name: format_track_name(track_id),
            stems,
        }
    }
}

/// Derive a display name from a track directory name
///
/// Drops a leading `NCS_`, turns underscores into spaces and capitalizes each
/// word: `NCS_Fall_to_Light` becomes `Fall To Light`.
pub fn format_track_name(track_id: &str) -> String {
    let name = track_id
        .strip_prefix(DISPLAY_NAME_PREFIX)
        .unwrap_or(track_id)
        .replace('_', " ");

    name.split_whitespace()
        .map(capitalize)
        .collect::<Vec<_>>()
        .join(" ")
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}

/// Scan the audio root and list every track directory holding all four stems
///
/// Runs fresh on every call. Hidden entries, plain files and directories with
/// missing stems are left out. Results are sorted by track id.
pub async fn list_tracks(audio_dir: &Path) -> Result<Vec<TrackDescriptor>, CatalogError> {
    let read_dir_error = |source| CatalogError::ReadDir {
        path: audio_dir.to_path_buf(),
        source,
    };

    let mut entries = fs::read_dir(audio_dir).await.map_err(read_dir_error)?;
    let mut tracks = Vec::new();

    while let Some(entry) = entries.next_entry().await.map_err(read_dir_error)? {
        let Some(track_id) = entry.file_name().to_str().map(str::to_owned) else {
            debug!("Skipping non UTF-8 entry {}", entry.path().display());
            continue;
        };

        if track_id.starts_with('.') || !is_directory(&entry.path()).await {
            continue;
        }

        let missing = missing_stems(audio_dir, &track_id).await;
        if missing.is_empty() {
            let track = TrackDescriptor::new(&track_id);
            debug!("Added track: {}", track.name);
            tracks.push(track);
        } else {
            debug!("Skipping {}: missing stems {:?}", track_id, missing);
        }
    }

    tracks.sort_by(|a, b| a.id.cmp(&b.id));
    info!("Found {} valid tracks", tracks.len());
    Ok(tracks)
}

/// Follows symlinks, so a linked track directory still counts
async fn is_directory(path: &Path) -> bool {
    fs::metadata(path)
        .await
        .map(|metadata| metadata.is_dir())
        .unwrap_or(false)
}

async fn missing_stems(audio_dir: &Path, track_id: &str) -> Vec<StemKind> {
    let mut missing = Vec::new();
    for kind in StemKind::ALL {
        let path = kind.file_path(audio_dir, track_id);
        if !matches!(fs::try_exists(&path).await, Ok(true)) {
            missing.push(kind);
        }
    }
    missing
}
