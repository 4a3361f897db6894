#![allow(dead_code)]

use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::Router;
use serde_json::Value;
use std::path::Path;
use stemdeck::catalog::StemKind;
use stemdeck::db::Database;
use stemdeck::server::{create_router, AppState};
use stemdeck::songs::SongService;
use stemdeck::uploads::{UploadStore, DEFAULT_MAX_UPLOAD_SIZE};
use tempfile::TempDir;
use tower::ServiceExt;

/// Initialize tracing for tests with proper test output handling
pub fn tracing_init() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Deterministic stand-in for mp3 data
pub fn sample_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Create `root/track_id/` with the given stems, each holding `len` bytes
pub fn create_track(root: &Path, track_id: &str, stems: &[StemKind], len: usize) {
    let dir = root.join(track_id);
    std::fs::create_dir_all(&dir).unwrap();
    for kind in stems {
        std::fs::write(dir.join(kind.file_name(track_id)), sample_bytes(len)).unwrap();
    }
}

/// One part of a multipart form body
pub enum FormPart<'a> {
    Text {
        name: &'a str,
        value: &'a str,
    },
    File {
        name: &'a str,
        file_name: &'a str,
        content_type: &'a str,
        data: &'a [u8],
    },
}

const BOUNDARY: &str = "stemdeck-test-boundary";

/// Encode `parts` as a `multipart/form-data` body delimited by `BOUNDARY`
pub fn multipart_body(parts: &[FormPart]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        match part {
            FormPart::Text { name, value } => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name)
                        .as_bytes(),
                );
                body.extend_from_slice(value.as_bytes());
            }
            FormPart::File {
                name,
                file_name,
                content_type,
                data,
            } => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                        name, file_name
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(
                    format!("Content-Type: {}\r\n\r\n", content_type).as_bytes(),
                );
                body.extend_from_slice(data);
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

/// Router over a temporary audio root, a temporary upload directory and an
/// in-memory song store
pub struct TestApp {
    pub router: Router,
    pub audio_dir: TempDir,
    pub uploads_dir: TempDir,
}

impl TestApp {
    pub fn new() -> Self {
        Self::build(Database::new_in_memory().unwrap(), DEFAULT_MAX_UPLOAD_SIZE)
    }

    /// Uploads larger than `max_size` bytes are refused
    pub fn with_upload_limit(max_size: u64) -> Self {
        Self::build(Database::new_in_memory().unwrap(), max_size)
    }

    /// Song store that can never be opened
    pub fn with_unreachable_store() -> Self {
        let missing = TempDir::new().unwrap();
        Self::build(
            Database::new(&missing.path().join("missing").join("songs.db")),
            DEFAULT_MAX_UPLOAD_SIZE,
        )
    }

    fn build(database: Database, max_upload_size: u64) -> Self {
        tracing_init();
        let audio_dir = TempDir::new().unwrap();
        let uploads_dir = TempDir::new().unwrap();
        let uploads = UploadStore::with_max_size(uploads_dir.path().to_path_buf(), max_upload_size);
        let state = AppState::new(
            audio_dir.path().to_path_buf(),
            SongService::new(database, uploads),
        );

        TestApp {
            router: create_router(state),
            audio_dir,
            uploads_dir,
        }
    }

    /// Names of the files currently in the upload directory
    pub fn stored_uploads(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(self.uploads_dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec();

        TestResponse {
            status,
            headers,
            body,
        }
    }

    pub async fn get(&self, uri: &str) -> TestResponse {
        self.send(Request::get(uri).body(Body::empty()).unwrap())
            .await
    }

    pub async fn send_multipart(&self, uri: &str, parts: &[FormPart<'_>]) -> TestResponse {
        let request = Request::post(uri)
            .header(
                "content-type",
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(multipart_body(parts)))
            .unwrap();
        self.send(request).await
    }

    pub async fn send_json(&self, method: &str, uri: &str, body: Value) -> TestResponse {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(request).await
    }
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl TestResponse {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}
