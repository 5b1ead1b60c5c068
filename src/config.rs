use crate::error::{ImportError, Result};
use std::env;
use std::path::PathBuf;

pub const DEFAULT_DATA_DIR: &str = "./ALL";
pub const DEFAULT_DATABASE_PATH: &str = "land_data.db";
pub const DEFAULT_BATCH_SIZE: usize = 1000;
pub const DEFAULT_CHECKPOINT_EVERY: usize = 10;
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";

/// Settings for one import run.
#[derive(Debug, Clone)]
pub struct ImportConfig {
    pub data_dir: PathBuf,
    pub database_path: PathBuf,
    /// Rows per multi-row INSERT inside a pair's transaction
    pub batch_size: usize,
    /// Force a WAL checkpoint after this many attempted pairs
    pub checkpoint_every: usize,
    pub attribute_extension: String,
    pub geometry_extension: String,
    pub json_logs: bool,
}

impl Default for ImportConfig {
    fn default() -> Self {
        ImportConfig {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            database_path: PathBuf::from(DEFAULT_DATABASE_PATH),
            batch_size: DEFAULT_BATCH_SIZE,
            checkpoint_every: DEFAULT_CHECKPOINT_EVERY,
            attribute_extension: "xml".to_string(),
            geometry_extension: "kml".to_string(),
            json_logs: false,
        }
    }
}

impl ImportConfig {
    /// Read `DATA_DIR`, `DATABASE_PATH`, `IMPORT_BATCH_SIZE` and
    /// `IMPORT_CHECKPOINT_EVERY`, loading a `.env` file first if present.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = ImportConfig::default();

        if let Some(dir) = lookup("DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(path) = lookup("DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }
        if let Some(raw) = lookup("IMPORT_BATCH_SIZE") {
            config.batch_size = parse_positive("IMPORT_BATCH_SIZE", &raw)?;
        }
        if let Some(raw) = lookup("IMPORT_CHECKPOINT_EVERY") {
            config.checkpoint_every = parse_positive("IMPORT_CHECKPOINT_EVERY", &raw)?;
        }

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(ImportError::Config("batch size must be at least 1".into()));
        }
        if self.checkpoint_every == 0 {
            return Err(ImportError::Config(
                "checkpoint interval must be at least 1".into(),
            ));
        }
        if !self.data_dir.is_dir() {
            return Err(ImportError::Config(format!(
                "Data directory not found: {}",
                self.data_dir.display()
            )));
        }
        Ok(())
    }
}

/// Settings for the read-only query server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub database_path: PathBuf,
    pub bind_addr: String,
    pub default_page_size: usize,
    pub max_page_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            database_path: PathBuf::from(DEFAULT_DATABASE_PATH),
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            default_page_size: 100,
            max_page_size: 1000,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        let mut config = ServerConfig::default();

        if let Ok(path) = env::var("DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }
        if let Ok(addr) = env::var("BIND_ADDR") {
            config.bind_addr = addr;
        }
        if let Ok(raw) = env::var("MAX_PAGE_SIZE") {
            config.max_page_size = parse_positive("MAX_PAGE_SIZE", &raw)?;
        }

        Ok(config)
    }

    /// Apply the default page size and cap at the maximum.
    pub fn page_limit(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_page_size)
            .clamp(1, self.max_page_size)
    }
}

fn parse_positive(key: &str, raw: &str) -> Result<usize> {
    match raw.trim().parse::<usize>() {
        Ok(value) if value > 0 => Ok(value),
        _ => Err(ImportError::Config(format!(
            "{} must be a positive integer, got '{}'",
            key, raw
        ))),
    }
}
