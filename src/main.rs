use stemdeck::catalog;
use stemdeck::config::Config;
use stemdeck::db::Database;
use stemdeck::server::{self, AppState};
use stemdeck::songs::SongService;
use stemdeck::uploads::UploadStore;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Use RUST_LOG env var if set, otherwise default to info level
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt().with_env_filter(log_filter).init();

    let config = Config::load()?;

    // Startup listing only; every /api/tracks request rescans
    match catalog::list_tracks(&config.audio_dir).await {
        Ok(tracks) => {
            info!("Available tracks:");
            for track in &tracks {
                info!("- {}", track.name);
            }
        }
        Err(e) => warn!("Could not list tracks at startup: {}", e),
    }

    let database = Database::new(&config.database_path);
    let uploads = UploadStore::new(config.uploads_dir.clone());
    let state = AppState::new(
        config.audio_dir.clone(),
        SongService::new(database, uploads),
    );
    let app = server::create_router(state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}
