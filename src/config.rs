use std::net::{AddrParseError, SocketAddr};
use std::path::PathBuf;
use thiserror::Error;
use tracing::info;

const DEFAULT_AUDIO_DIR: &str = "processed";
const DEFAULT_DATABASE_PATH: &str = "music_db.sqlite";
const DEFAULT_UPLOADS_DIR: &str = "uploads";
const DEFAULT_BIND_ADDR: &str = "127.0.0.1:5001";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid bind address {value:?}: {source}")]
    InvalidBindAddr {
        value: String,
        #[source]
        source: AddrParseError,
    },
}

/// Server configuration
/// Loaded from environment variables, with an optional .env file layered underneath
#[derive(Clone, Debug)]
pub struct Config {
    /// Root directory holding one subdirectory of stems per track
    pub audio_dir: PathBuf,
    /// SQLite file backing the songs collection
    pub database_path: PathBuf,
    /// Directory uploaded audio files are written to
    pub uploads_dir: PathBuf,
    /// Address the HTTP server listens on
    pub bind_addr: SocketAddr,
}

impl Config {
    /// Load configuration, reading .env first if one exists
    pub fn load() -> Result<Self, ConfigError> {
        if dotenvy::dotenv().is_ok() {
            info!("Config: loaded .env file");
        } else {
            info!("Config: no .env file found, using environment only");
        }

        Self::from_env()
    }

    /// Load configuration from STEMDECK_* environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let audio_dir = lookup("STEMDECK_AUDIO_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_AUDIO_DIR));

        let database_path = lookup("STEMDECK_DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE_PATH));

        let uploads_dir = lookup("STEMDECK_UPLOADS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_UPLOADS_DIR));

        let bind_value =
            lookup("STEMDECK_BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = bind_value
            .parse()
            .map_err(|source| ConfigError::InvalidBindAddr {
                value: bind_value.clone(),
                source,
            })?;

        info!("Config: audio directory: {}", audio_dir.display());
        info!("Config: database path: {}", database_path.display());
        info!("Config: uploads directory: {}", uploads_dir.display());

        Ok(Self {
            audio_dir,
            database_path,
            uploads_dir,
            bind_addr,
        })
    }
}
