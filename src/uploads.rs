use axum::extract::multipart::{Field, MultipartError};
use axum::extract::Multipart;
use axum::http::StatusCode;
use chrono::Utc;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Multipart field carrying the audio file
pub const AUDIO_FIELD: &str = "audio";
/// Multipart field carrying an optional title
pub const TITLE_FIELD: &str = "title";
/// Content types accepted for upload
pub const ALLOWED_TYPES: [&str; 2] = ["audio/mpeg", "audio/wav"];
/// Largest audio file accepted, in bytes
pub const DEFAULT_MAX_UPLOAD_SIZE: u64 = 50 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("No file uploaded")]
    NoFile,
    #[error("Invalid file type. Only MP3 and WAV files are allowed.")]
    InvalidFileType(String),
    #[error("File too large")]
    TooLarge,
    #[error("Invalid upload: {0}")]
    Malformed(String),
    #[error("Failed to store upload: {0}")]
    Io(#[from] std::io::Error),
}

impl From<MultipartError> for UploadError {
    fn from(err: MultipartError) -> Self {
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            UploadError::TooLarge
        } else {
            UploadError::Malformed(err.body_text())
        }
    }
}

/// An audio file received in a multipart form, held in memory
#[derive(Debug)]
pub struct AudioFile {
    pub original_name: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

/// Fields of a song upload form
#[derive(Debug, Default)]
pub struct SongForm {
    pub title: Option<String>,
    pub audio: Option<AudioFile>,
}

/// Where an accepted upload was written
#[derive(Debug, Clone, PartialEq)]
pub struct StoredFile {
    pub filename: String,
    pub path: PathBuf,
}

/// Directory holding uploaded audio files
#[derive(Debug, Clone)]
pub struct UploadStore {
    dir: PathBuf,
    max_size: u64,
}

impl UploadStore {
    pub fn new(dir: PathBuf) -> Self {
        Self::with_max_size(dir, DEFAULT_MAX_UPLOAD_SIZE)
    }

    pub fn with_max_size(dir: PathBuf, max_size: u64) -> Self {
        UploadStore { dir, max_size }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    /// Read an upload form: an `audio` file part and an optional `title` part
    ///
    /// The file's content type is checked before its body is read, and reading
    /// stops as soon as the body passes `max_size`. Other parts are skipped.
    pub async fn read_form(&self, mut multipart: Multipart) -> Result<SongForm, UploadError> {
        let mut form = SongForm::default();

        while let Some(field) = multipart.next_field().await? {
            let name = field.name().map(str::to_string);
            match name.as_deref() {
                Some(AUDIO_FIELD) => form.audio = Some(self.read_audio(field).await?),
                Some(TITLE_FIELD) => form.title = Some(field.text().await?),
                other => debug!("Ignoring upload form field {:?}", other),
            }
        }

        Ok(form)
    }

    async fn read_audio(&self, mut field: Field<'_>) -> Result<AudioFile, UploadError> {
        let content_type = field.content_type().unwrap_or_default().to_string();
        if !ALLOWED_TYPES.contains(&content_type.as_str()) {
            return Err(UploadError::InvalidFileType(content_type));
        }
        let original_name = field.file_name().unwrap_or_default().to_string();

        let mut data = Vec::new();
        while let Some(chunk) = field.chunk().await? {
            if (data.len() + chunk.len()) as u64 > self.max_size {
                return Err(UploadError::TooLarge);
            }
            data.extend_from_slice(&chunk);
        }

        Ok(AudioFile {
            original_name,
            content_type,
            data,
        })
    }

    /// Write an accepted file under a fresh unique name, keeping its extension
    pub async fn save(&self, audio: &AudioFile) -> Result<StoredFile, UploadError> {
        fs::create_dir_all(&self.dir).await?;

        let filename = unique_file_name(&audio.original_name);
        let path = self.dir.join(&filename);
        fs::write(&path, &audio.data).await?;
        info!("Stored upload {} ({} bytes)", path.display(), audio.data.len());

        Ok(StoredFile { filename, path })
    }

    /// Remove a stored upload
    ///
    /// Only files directly inside the upload directory are touched: `filename`
    /// must be a bare file name and `recorded_path` must point at it. Failures
    /// are logged, never returned.
    pub async fn remove(&self, filename: &str, recorded_path: &str) {
        if Path::new(filename).file_name() != Some(OsStr::new(filename)) {
            warn!("Not removing upload with unexpected name {:?}", filename);
            return;
        }
        let path = self.dir.join(filename);
        if Path::new(recorded_path) != path {
            warn!(
                "Not removing {:?}: outside upload directory {}",
                recorded_path,
                self.dir.display()
            );
            return;
        }

        match fs::remove_file(&path).await {
            Ok(()) => info!("Removed upload {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Upload {} already gone", path.display())
            }
            Err(e) => warn!("Failed to remove upload {}: {}", path.display(), e),
        }
    }
}

/// `<millis>-<uuid>.<ext>`, with the extension of `original_name` if it has a
/// plain alphanumeric one
fn unique_file_name(original_name: &str) -> String {
    let stem = format!("{}-{}", Utc::now().timestamp_millis(), Uuid::new_v4().simple());
    let extension = Path::new(original_name)
        .extension()
        .and_then(OsStr::to_str)
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()));

    match extension {
        Some(extension) => format!("{}.{}", stem, extension),
        None => stem,
    }
}
