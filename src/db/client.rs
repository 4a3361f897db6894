use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::db::models::{SongRecord, UPLOAD_DATE_FIELD};

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum DbError {
    /// The store could not be opened or its schema could not be created
    #[error("Database connection failed")]
    Unavailable(#[source] sqlx::Error),
    #[error("Database error: {0}")]
    Query(#[from] sqlx::Error),
    #[error("Corrupt document for song {id}: {source}")]
    Document {
        id: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Handle to the songs collection
///
/// Cheap to clone. The pool connects lazily, so constructing a `Database`
/// never fails on an unreachable store; the first operation does, with
/// `DbError::Unavailable`, and the schema is created on the first operation
/// that succeeds in connecting.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
    schema: Arc<OnceCell<()>>,
}

impl Database {
    /// Open the SQLite file at `database_path`, creating it if missing
    pub fn new(database_path: &Path) -> Self {
        info!("Using song database at {}", database_path.display());
        let options = SqliteConnectOptions::new()
            .filename(database_path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect_lazy_with(options);

        Self::from_pool(pool)
    }

    /// Private in-memory database, used by tests
    pub fn new_in_memory() -> Result<Self, DbError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        // Every connection to :memory: is a separate database, so pin a single one
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect_lazy_with(options);

        Ok(Self::from_pool(pool))
    }

    fn from_pool(pool: SqlitePool) -> Self {
        Database {
            pool,
            schema: Arc::new(OnceCell::new()),
        }
    }

    /// Connect and create tables if this handle has not done so yet
    async fn ready(&self) -> Result<(), DbError> {
        self.schema
            .get_or_try_init(|| async {
                self.create_tables().await.map_err(|e| {
                    error!("Failed to open song database: {}", e);
                    DbError::Unavailable(e)
                })
            })
            .await?;
        Ok(())
    }

    async fn create_tables(&self) -> Result<(), sqlx::Error> {
        // Everything except id and title lives in the JSON document column
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS songs (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                document TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        debug!("Song database schema ready");
        Ok(())
    }

    /// Get every song, most recently uploaded first
    pub async fn get_songs(&self) -> Result<Vec<SongRecord>, DbError> {
        self.ready().await?;

        let rows = sqlx::query(
            r#"
            SELECT id, title, document FROM songs
            ORDER BY json_extract(document, '$.uploadDate') DESC, rowid DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_song).collect()
    }

    /// Get a song by id
    pub async fn get_song(&self, song_id: &str) -> Result<Option<SongRecord>, DbError> {
        self.ready().await?;

        let row = sqlx::query("SELECT id, title, document FROM songs WHERE id = ?")
            .bind(song_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_song).transpose()
    }

    /// Insert a new song under a freshly generated id
    ///
    /// `uploadDate` is set to the insert time unless the document already has one.
    pub async fn insert_song(
        &self,
        title: &str,
        mut fields: Map<String, Value>,
    ) -> Result<SongRecord, DbError> {
        self.ready().await?;

        let now = timestamp();
        fields
            .entry(UPLOAD_DATE_FIELD)
            .or_insert_with(|| Value::String(now.clone()));

        let song = SongRecord::from_document(Uuid::new_v4().to_string(), title.to_string(), fields);
        let document = serde_json::to_string(&song.fields).map_err(|source| DbError::Document {
            id: song.id.clone(),
            source,
        })?;

        sqlx::query(
            r#"
            INSERT INTO songs (id, title, document, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&song.id)
        .bind(&song.title)
        .bind(&document)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(song)
    }

    /// Set a song's title. Returns false if no song has this id.
    pub async fn update_song_title(&self, song_id: &str, title: &str) -> Result<bool, DbError> {
        self.ready().await?;

        let result = sqlx::query("UPDATE songs SET title = ?, updated_at = ? WHERE id = ?")
            .bind(title)
            .bind(timestamp())
            .bind(song_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete a song. Returns false if no song has this id.
    pub async fn delete_song(&self, song_id: &str) -> Result<bool, DbError> {
        self.ready().await?;

        let result = sqlx::query("DELETE FROM songs WHERE id = ?")
            .bind(song_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

/// RFC 3339 in UTC with fixed precision, so stored dates sort as text
fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn row_to_song(row: &SqliteRow) -> Result<SongRecord, DbError> {
    let id: String = row.get("id");
    let document: String = row.get("document");
    let fields: Map<String, Value> =
        serde_json::from_str(&document).map_err(|source| DbError::Document {
            id: id.clone(),
            source,
        })?;

    Ok(SongRecord::from_document(id, row.get("title"), fields))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn fields(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected an object, got {}", other),
        }
    }

    #[tokio::test]
    async fn test_insert_keeps_extra_fields() {
        let db = Database::new_in_memory().unwrap();

        let inserted = db
            .insert_song(
                "Intro",
                fields(json!({"fileType": "audio/mpeg", "fileSize": 2048})),
            )
            .await
            .unwrap();
        let loaded = db.get_song(&inserted.id).await.unwrap().unwrap();

        assert_eq!(loaded, inserted);
        assert_eq!(loaded.fields["fileType"], json!("audio/mpeg"));
        assert_eq!(loaded.fields["fileSize"], json!(2048));
    }

    async fn titles(db: &Database) -> Vec<String> {
        db.get_songs()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.title)
            .collect()
    }

    #[tokio::test]
    async fn test_songs_listed_newest_first() {
        let db = Database::new_in_memory().unwrap();
        for title in ["first", "second", "third"] {
            db.insert_song(title, Map::new()).await.unwrap();
        }

        assert_eq!(titles(&db).await, vec!["third", "second", "first"]);
    }

    #[tokio::test]
    async fn test_upload_date_defaults_to_insert_time() {
        let db = Database::new_in_memory().unwrap();

        let song = db.insert_song("Intro", Map::new()).await.unwrap();
        let date = song.fields[UPLOAD_DATE_FIELD].as_str().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(date).is_ok(), "{}", date);

        let dated = db
            .insert_song("Old", fields(json!({"uploadDate": "2001-02-03T04:05:06Z"})))
            .await
            .unwrap();
        assert_eq!(dated.fields[UPLOAD_DATE_FIELD], json!("2001-02-03T04:05:06Z"));

        // An explicit older date sorts behind the one stamped at insert
        assert_eq!(titles(&db).await, vec!["Intro", "Old"]);
    }

    #[tokio::test]
    async fn test_update_and_delete_report_missing_rows() {
        let db = Database::new_in_memory().unwrap();
        let song = db.insert_song("Intro", Map::new()).await.unwrap();

        assert!(!db.update_song_title("missing", "x").await.unwrap());
        assert!(db.update_song_title(&song.id, "Outro").await.unwrap());
        // Same title again still matches the row
        assert!(db.update_song_title(&song.id, "Outro").await.unwrap());

        assert!(!db.delete_song("missing").await.unwrap());
        assert!(db.delete_song(&song.id).await.unwrap());
        assert!(db.get_song(&song.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unreachable_file_is_unavailable() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(&temp_dir.path().join("no_such_dir").join("songs.db"));

        let err = db.get_songs().await.unwrap_err();

        assert!(matches!(err, DbError::Unavailable(_)));
        assert_eq!(err.to_string(), "Database connection failed");
    }
}
