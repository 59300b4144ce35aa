use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

const DB_DIR: &str = "scoreboard_ledger";
const DB_FILE: &str = "ledger.sqlite";

pub const DEFAULT_PARALLELISM: usize = 3;
pub const DEFAULT_MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub db_path: Option<PathBuf>,
    pub parallelism: usize,
    pub download_timeout: Duration,
    pub max_image_bytes: usize,
    pub extractor_url: Option<String>,
    pub extractor_api_key: Option<String>,
    pub extractor_timeout: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            parallelism: DEFAULT_PARALLELISM,
            download_timeout: Duration::from_secs(10),
            max_image_bytes: DEFAULT_MAX_IMAGE_BYTES,
            extractor_url: None,
            extractor_api_key: None,
            extractor_timeout: Duration::from_secs(60),
        }
    }
}

impl LedgerConfig {
    /// Loads `.env.local` / `.env` if present, then reads the process environment.
    pub fn from_env() -> Self {
        let _ = dotenvy::from_filename(".env.local");
        let _ = dotenvy::from_filename(".env");

        let defaults = Self::default();
        Self {
            db_path: non_empty("LEDGER_DB_PATH")
                .map(PathBuf::from)
                .or(defaults.db_path),
            parallelism: env_parse("INGEST_PARALLELISM")
                .unwrap_or(DEFAULT_PARALLELISM)
                .clamp(1, 16),
            download_timeout: env_parse("DOWNLOAD_TIMEOUT_SECS")
                .map(|secs: u64| Duration::from_secs(secs.max(1)))
                .unwrap_or(defaults.download_timeout),
            max_image_bytes: env_parse("MAX_IMAGE_BYTES")
                .filter(|n: &usize| *n > 0)
                .unwrap_or(DEFAULT_MAX_IMAGE_BYTES),
            extractor_url: non_empty("EXTRACTOR_URL"),
            extractor_api_key: non_empty("EXTRACTOR_API_KEY"),
            extractor_timeout: env_parse("EXTRACTOR_TIMEOUT_SECS")
                .map(|secs: u64| Duration::from_secs(secs.max(1)))
                .unwrap_or(defaults.extractor_timeout),
        }
    }

    pub fn with_db_path(mut self, path: PathBuf) -> Self {
        self.db_path = Some(path);
        self
    }
}

/// Installs the fmt subscriber, filtered by `RUST_LOG` (default `info`).
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

pub fn default_db_path() -> Option<PathBuf> {
    if let Ok(base) = env::var("XDG_CACHE_HOME")
        && !base.trim().is_empty()
    {
        return Some(PathBuf::from(base).join(DB_DIR).join(DB_FILE));
    }
    let home = env::var("HOME").ok()?;
    if home.trim().is_empty() {
        return None;
    }
    Some(PathBuf::from(home).join(".cache").join(DB_DIR).join(DB_FILE))
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|val| val.trim().parse::<T>().ok())
}
