use crate::db::{Database, DbError, SongRecord, TITLE_FIELD};
use crate::uploads::{SongForm, UploadError, UploadStore};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{info, warn};

const FILENAME_FIELD: &str = "filename";
const FILE_PATH_FIELD: &str = "filePath";

#[derive(Error, Debug)]
pub enum SongError {
    #[error("{0}")]
    Validation(String),
    #[error("Song not found")]
    NotFound(String),
    #[error(transparent)]
    Upload(#[from] UploadError),
    #[error(transparent)]
    Database(#[from] DbError),
}

/// Song record operations on top of the songs collection
///
/// Input is checked before the store is touched, so a bad request is rejected
/// with a validation error even when the store is down.
#[derive(Debug, Clone)]
pub struct SongService {
    database: Database,
    uploads: UploadStore,
}

impl SongService {
    pub fn new(database: Database, uploads: UploadStore) -> Self {
        SongService { database, uploads }
    }

    pub fn uploads(&self) -> &UploadStore {
        &self.uploads
    }

    pub async fn list_songs(&self) -> Result<Vec<SongRecord>, SongError> {
        let songs = self.database.get_songs().await?;
        info!("Listed {} songs", songs.len());
        Ok(songs)
    }

    pub async fn get_song(&self, song_id: &str) -> Result<SongRecord, SongError> {
        self.database
            .get_song(song_id)
            .await?
            .ok_or_else(|| SongError::NotFound(song_id.to_string()))
    }

    /// Store a new song document. `title` must be a non-empty string; any
    /// `_id` in the document is replaced by a generated one.
    pub async fn create_song(
        &self,
        mut document: Map<String, Value>,
    ) -> Result<SongRecord, SongError> {
        let title = match document.remove(TITLE_FIELD) {
            Some(Value::String(title)) if !title.is_empty() => title,
            _ => return Err(SongError::Validation("Title is required".to_string())),
        };

        let song = self.database.insert_song(&title, document).await?;
        info!("Created song {} ({})", song.id, song.title);
        Ok(song)
    }

    /// Store an uploaded audio file and create its song record
    ///
    /// The title defaults to the uploaded file's name. If the record cannot be
    /// written the stored file is removed again.
    pub async fn upload_song(&self, form: SongForm) -> Result<SongRecord, SongError> {
        let audio = form.audio.ok_or(UploadError::NoFile)?;
        let title = form
            .title
            .filter(|title| !title.is_empty())
            .unwrap_or_else(|| audio.original_name.clone());
        if title.is_empty() {
            return Err(SongError::Validation("Title is required".to_string()));
        }

        let stored = self.uploads.save(&audio).await?;
        let file_path = stored.path.to_string_lossy().into_owned();
        let mut document = Map::new();
        document.insert(FILENAME_FIELD.to_string(), Value::from(stored.filename.clone()));
        document.insert(FILE_PATH_FIELD.to_string(), Value::from(file_path.clone()));
        document.insert("fileType".to_string(), Value::from(audio.content_type));
        document.insert("fileSize".to_string(), Value::from(audio.data.len()));

        match self.database.insert_song(&title, document).await {
            Ok(song) => {
                info!("Uploaded song {} ({}) to {}", song.id, song.title, file_path);
                Ok(song)
            }
            Err(e) => {
                warn!("Failed to record upload {}, removing it", file_path);
                self.uploads.remove(&stored.filename, &file_path).await;
                Err(e.into())
            }
        }
    }

    /// Rename a song and return the refreshed record
    pub async fn rename_song(
        &self,
        song_id: &str,
        new_title: &str,
    ) -> Result<SongRecord, SongError> {
        if new_title.is_empty() {
            return Err(SongError::Validation("New title is required".to_string()));
        }

        if !self.database.update_song_title(song_id, new_title).await? {
            return Err(SongError::NotFound(song_id.to_string()));
        }
        info!("Renamed song {} to {:?}", song_id, new_title);

        // NotFound here means it was deleted between the update and the read
        self.get_song(song_id).await
    }

    /// Delete a song and the uploaded file it points at, if any
    pub async fn delete_song(&self, song_id: &str) -> Result<(), SongError> {
        let song = self.get_song(song_id).await?;
        if !self.database.delete_song(song_id).await? {
            return Err(SongError::NotFound(song_id.to_string()));
        }
        info!("Deleted song {}", song_id);

        let filename = song.fields.get(FILENAME_FIELD).and_then(Value::as_str);
        let file_path = song.fields.get(FILE_PATH_FIELD).and_then(Value::as_str);
        if let (Some(filename), Some(file_path)) = (filename, file_path) {
            self.uploads.remove(filename, file_path).await;
        }
        Ok(())
    }
}
