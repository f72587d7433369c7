//! Runtime configuration read from the environment
//!
//! Every value has a default so the server starts with no `.env` at all.

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Application configuration assembled once at startup
#[derive(Debug, Clone)]
pub struct Config {
    /// Listen port (`PORT`, default 8080)
    pub port: u16,

    /// Path of the redb file (`DATABASE_URL`, default "data.db")
    pub database_url: String,

    /// Public origin used to render short URLs (`BASE_URL`)
    pub base_url: String,

    /// Timeout for the outbound fetch of a full link (`FETCH_TIMEOUT_SECS`)
    pub fetch_timeout: Duration,

    /// Bodies larger than this are not scanned for meta tags (`FETCH_MAX_BODY_BYTES`)
    pub fetch_max_body_bytes: usize,

    /// Honour `HTTP_PROXY`/`HTTPS_PROXY` for outbound fetches (`FETCH_VIA_PROXY`)
    pub fetch_via_proxy: bool,

    /// scrypt cost parameter, N = 2^log_n (`SCRYPT_LOG_N`)
    pub scrypt_log_n: u8,

    /// Slug cache capacity (`CACHE_MAX_ENTRIES`)
    pub cache_max_entries: u64,

    /// Slug cache time-to-live (`CACHE_TTL_SECS`)
    pub cache_ttl: Duration,
}

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_FETCH_MAX_BODY_BYTES: usize = 5_000_000;
pub const DEFAULT_SCRYPT_LOG_N: u8 = 14;
pub const DEFAULT_CACHE_MAX_ENTRIES: u64 = 500;
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60);

impl Config {
    /// Reads the configuration from environment variables
    ///
    /// Call `dotenvy::dotenv()` first if a `.env` file should be honoured.
    pub fn from_env() -> Self {
        let port = env_or("PORT", DEFAULT_PORT);
        let database_url = env::var("DATABASE_URL").unwrap_or_else(|_| "data.db".to_string());
        let base_url = env::var("BASE_URL")
            .unwrap_or_else(|_| format!("http://localhost:{port}"))
            .trim_end_matches('/')
            .to_string();

        let config = Self {
            port,
            database_url,
            base_url,
            fetch_timeout: Duration::from_secs(env_or(
                "FETCH_TIMEOUT_SECS",
                DEFAULT_FETCH_TIMEOUT.as_secs(),
            )),
            fetch_max_body_bytes: env_or("FETCH_MAX_BODY_BYTES", DEFAULT_FETCH_MAX_BODY_BYTES),
            fetch_via_proxy: env_or("FETCH_VIA_PROXY", true),
            scrypt_log_n: env_or("SCRYPT_LOG_N", DEFAULT_SCRYPT_LOG_N),
            cache_max_entries: env_or("CACHE_MAX_ENTRIES", DEFAULT_CACHE_MAX_ENTRIES),
            cache_ttl: Duration::from_secs(env_or("CACHE_TTL_SECS", DEFAULT_CACHE_TTL.as_secs())),
        };

        tracing::info!(
            port = config.port,
            database_url = %config.database_url,
            base_url = %config.base_url,
            fetch_timeout_secs = config.fetch_timeout.as_secs(),
            scrypt_log_n = config.scrypt_log_n,
            cache_max_entries = config.cache_max_entries,
            cache_ttl_secs = config.cache_ttl.as_secs(),
            "configuration loaded"
        );

        config
    }

    /// Configuration for tests: cheap scrypt, short fetch timeout, no proxy
    pub fn for_tests(database_url: &str) -> Self {
        Self {
            port: DEFAULT_PORT,
            database_url: database_url.to_string(),
            base_url: format!("http://localhost:{DEFAULT_PORT}"),
            fetch_timeout: Duration::from_secs(5),
            fetch_max_body_bytes: DEFAULT_FETCH_MAX_BODY_BYTES,
            fetch_via_proxy: false,
            scrypt_log_n: 4,
            cache_max_entries: DEFAULT_CACHE_MAX_ENTRIES,
            cache_ttl: DEFAULT_CACHE_TTL,
        }
    }
}

/// Parses `key` from the environment, falling back to `default` when unset or malformed
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(default)
}
