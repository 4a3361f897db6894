use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use regex::Regex;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, info};

use crate::catalog::StemKind;

pub const AUDIO_CONTENT_TYPE: &str = "audio/mpeg";

static RANGE_PATTERN: OnceLock<Regex> = OnceLock::new();

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Invalid stem type")]
    InvalidStemType(String),
    #[error("Audio file not found")]
    NotFound(PathBuf),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Inclusive byte range requested through a `Range` header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    /// Inclusive
    pub end: u64,
}

impl ByteRange {
    /// Parse `bytes=<start>-<end>` against a file of `file_size` bytes
    ///
    /// Both bounds are optional: `start` defaults to 0 and `end` to the last
    /// byte. An `end` past the file is clamped to the last byte. Returns `None`
    /// for anything else (wrong unit, multiple ranges, garbage, `start` past
    /// `end`, empty file), and the caller serves the whole file.
    pub fn parse(header: &str, file_size: u64) -> Option<ByteRange> {
        let captures = range_pattern().captures(header)?;
        let bound = |index: usize| {
            captures
                .get(index)
                .map(|m| m.as_str())
                .filter(|s| !s.is_empty())
        };

        let last_byte = file_size.checked_sub(1)?;
        let start = match bound(1) {
            Some(digits) => digits.parse().ok()?,
            None => 0,
        };
        let end = match bound(2) {
            Some(digits) => digits.parse::<u64>().ok()?.min(last_byte),
            None => last_byte,
        };

        if start > end {
            return None;
        }
        Some(ByteRange { start, end })
    }

    pub fn length(&self) -> u64 {
        self.end - self.start + 1
    }
}

fn range_pattern() -> &'static Regex {
    RANGE_PATTERN.get_or_init(|| Regex::new(r"^\s*bytes=(\d*)-(\d*)\s*$").unwrap())
}

/// Audio bytes ready to send: the whole stem file, or one range of it
#[derive(Debug)]
pub struct StemAudio {
    pub file_size: u64,
    pub range: Option<ByteRange>,
    pub body: Vec<u8>,
}

impl StemAudio {
    pub fn status(&self) -> StatusCode {
        if self.range.is_some() {
            StatusCode::PARTIAL_CONTENT
        } else {
            StatusCode::OK
        }
    }

    /// `Content-Range` value for partial responses
    pub fn content_range(&self) -> Option<String> {
        self.range
            .map(|range| format!("bytes {}-{}/{}", range.start, range.end, self.file_size))
    }
}

impl IntoResponse for StemAudio {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(AUDIO_CONTENT_TYPE));
        headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(self.body.len()));
        if let Some(value) = self.content_range() {
            if let Ok(value) = HeaderValue::from_str(&value) {
                headers.insert(header::CONTENT_RANGE, value);
            }
        }

        (self.status(), headers, self.body).into_response()
    }
}

/// A track id names exactly one directory directly under the audio root
fn is_track_dir_name(track_id: &str) -> bool {
    !track_id.is_empty()
        && track_id != "."
        && track_id != ".."
        && !track_id.contains(['/', '\\', '\0'])
}

/// Read a stem of a track, honoring an optional `Range` header
///
/// The stem type is checked before anything on disk is looked at.
pub async fn stream_audio(
    audio_dir: &Path,
    track_id: &str,
    stem_type: &str,
    range_header: Option<&str>,
) -> Result<StemAudio, StreamError> {
    let stem = StemKind::from_file_suffix(stem_type)
        .ok_or_else(|| StreamError::InvalidStemType(stem_type.to_string()))?;

    if !is_track_dir_name(track_id) {
        return Err(StreamError::NotFound(PathBuf::from(track_id)));
    }

    let path = stem.file_path(audio_dir, track_id);
    let mut file = match File::open(&path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(StreamError::NotFound(path));
        }
        Err(e) => return Err(e.into()),
    };

    let metadata = file.metadata().await?;
    if !metadata.is_file() {
        return Err(StreamError::NotFound(path));
    }
    let file_size = metadata.len();

    let range = range_header.and_then(|value| {
        let range = ByteRange::parse(value, file_size);
        if range.is_none() {
            debug!("Unusable Range header {:?}, sending full file", value);
        }
        range
    });

    let body = match range {
        Some(range) => {
            file.seek(SeekFrom::Start(range.start)).await?;
            let mut body = Vec::with_capacity(range.length() as usize);
            file.take(range.length()).read_to_end(&mut body).await?;
            info!(
                "Serving bytes {}-{}/{} of {}",
                range.start,
                range.end,
                file_size,
                path.display()
            );
            body
        }
        None => {
            let mut body = Vec::with_capacity(file_size as usize);
            file.read_to_end(&mut body).await?;
            info!("Serving full file {} ({} bytes)", path.display(), file_size);
            body
        }
    };

    Ok(StemAudio {
        file_size,
        range,
        body,
    })
}
