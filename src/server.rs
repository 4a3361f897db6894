use crate::catalog::{self, CatalogError, TrackDescriptor};
use crate::db::{DbError, SongRecord};
use crate::songs::{SongError, SongService};
use crate::streaming::{self, StemAudio, StreamError};
use crate::uploads::UploadError;
use axum::{
    extract::{DefaultBodyLimit, FromRequest, Multipart, OriginalUri, Path, Request, State},
    http::{header, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{error, info, warn};

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub audio_dir: Arc<PathBuf>,
    pub songs: SongService,
}

impl AppState {
    pub fn new(audio_dir: PathBuf, songs: SongService) -> Self {
        AppState {
            audio_dir: Arc::new(audio_dir),
            songs,
        }
    }
}

/// Any failure a handler can report, rendered as `{"error": message}`
#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Stream(#[from] StreamError),
    #[error(transparent)]
    Song(#[from] SongError),
    #[error("API route not found")]
    RouteNotFound,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Stream(StreamError::InvalidStemType(_)) => StatusCode::BAD_REQUEST,
            ApiError::Song(SongError::Validation(_)) => StatusCode::BAD_REQUEST,
            ApiError::Song(SongError::Upload(
                UploadError::NoFile | UploadError::InvalidFileType(_) | UploadError::Malformed(_),
            )) => StatusCode::BAD_REQUEST,
            ApiError::Song(SongError::Upload(UploadError::TooLarge)) => {
                StatusCode::PAYLOAD_TOO_LARGE
            }
            ApiError::Stream(StreamError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Song(SongError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::RouteNotFound => StatusCode::NOT_FOUND,
            ApiError::Catalog(_)
            | ApiError::Stream(StreamError::Io(_))
            | ApiError::Song(SongError::Upload(UploadError::Io(_)))
            | ApiError::Song(SongError::Database(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            match &self {
                ApiError::Song(SongError::Database(DbError::Unavailable(source))) => {
                    error!("{}: {}", self, source)
                }
                _ => error!("Request failed: {}", self),
            }
        } else {
            warn!("Request rejected ({}): {}", status, self);
        }

        let body = ErrorBody {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct TracksResponse {
    pub tracks: Vec<TrackDescriptor>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct RenameRequest {
    pub title: Option<String>,
}

/// Room for multipart boundaries and text fields on top of the file itself
const UPLOAD_FORM_OVERHEAD: usize = 64 * 1024;

/// Create the HTTP router
pub fn create_router(state: AppState) -> Router {
    let upload_limit = usize::try_from(state.songs.uploads().max_size())
        .unwrap_or(usize::MAX)
        .saturating_add(UPLOAD_FORM_OVERHEAD);

    let api = Router::new()
        .route("/songs", get(list_songs))
        .route(
            "/song",
            post(create_song).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/song/:id", get(get_song).delete(delete_song))
        .route("/song/:id/rename", put(rename_song))
        .route("/tracks", get(list_tracks))
        .route("/audio/:track_id/:stem_type", get(stream_audio))
        .fallback(route_not_found);

    Router::new()
        .nest("/api", api)
        .layer(cors_layer())
        .with_state(state)
}

/// Browsers may call from any origin, with credentials, and need to read the
/// range headers to seek
fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::PUT,
            Method::POST,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::RANGE,
            header::ACCEPT_RANGES,
            header::CONTENT_RANGE,
        ])
        .expose_headers([
            header::CONTENT_RANGE,
            header::ACCEPT_RANGES,
            header::CONTENT_LENGTH,
        ])
}

async fn list_songs(State(state): State<AppState>) -> Result<Json<Vec<SongRecord>>, ApiError> {
    Ok(Json(state.songs.list_songs().await?))
}

async fn get_song(
    State(state): State<AppState>,
    Path(song_id): Path<String>,
) -> Result<Json<SongRecord>, ApiError> {
    Ok(Json(state.songs.get_song(&song_id).await?))
}

/// `multipart/form-data` bodies are audio uploads; anything else is read as
/// a JSON document. A missing or unparseable JSON body is treated as an empty
/// document and fails title validation.
async fn create_song(
    State(state): State<AppState>,
    request: Request,
) -> Result<Json<SongRecord>, ApiError> {
    let is_multipart = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("multipart/form-data"));

    if is_multipart {
        let multipart = Multipart::from_request(request, &state)
            .await
            .map_err(|rejection| SongError::from(UploadError::Malformed(rejection.body_text())))?;
        let form = state
            .songs
            .uploads()
            .read_form(multipart)
            .await
            .map_err(SongError::from)?;
        return Ok(Json(state.songs.upload_song(form).await?));
    }

    let document = Json::<Map<String, Value>>::from_request(request, &state)
        .await
        .map(|Json(document)| document)
        .unwrap_or_default();
    Ok(Json(state.songs.create_song(document).await?))
}

async fn rename_song(
    State(state): State<AppState>,
    Path(song_id): Path<String>,
    body: Option<Json<RenameRequest>>,
) -> Result<Json<SongRecord>, ApiError> {
    let title = body.and_then(|Json(request)| request.title).unwrap_or_default();
    Ok(Json(state.songs.rename_song(&song_id, &title).await?))
}

async fn delete_song(
    State(state): State<AppState>,
    Path(song_id): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.songs.delete_song(&song_id).await?;
    Ok(Json(MessageResponse {
        message: "Song deleted successfully".to_string(),
    }))
}

async fn list_tracks(State(state): State<AppState>) -> Result<Json<TracksResponse>, ApiError> {
    let tracks = catalog::list_tracks(&state.audio_dir).await?;
    Ok(Json(TracksResponse { tracks }))
}

async fn stream_audio(
    State(state): State<AppState>,
    Path((track_id, stem_type)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<StemAudio, ApiError> {
    // A Range header that is not valid UTF-8 cannot match bytes=<start>-<end>
    let range = headers
        .get(header::RANGE)
        .and_then(|value| value.to_str().ok());

    info!("Audio request for {}/{} (range: {:?})", track_id, stem_type, range);
    Ok(streaming::stream_audio(&state.audio_dir, &track_id, &stem_type, range).await?)
}

async fn route_not_found(method: Method, OriginalUri(uri): OriginalUri) -> ApiError {
    info!("API route not found: {} {}", method, uri);
    ApiError::RouteNotFound
}
