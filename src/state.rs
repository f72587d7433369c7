//! Application state shared across all request handlers

use std::sync::Arc;

use crate::auth::AuthService;
use crate::config::Config;
use crate::database::Database;
use crate::error::AppError;
use crate::password::PasswordEngine;
use crate::short_link::ShortLinkService;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: Arc<Database>,
    pub auth: Arc<AuthService>,

    /// Short link service; owns the slug cache
    pub links: Arc<ShortLinkService>,
}

impl AppState {
    pub fn new(config: Config, db: Database) -> Result<Self, AppError> {
        let db = Arc::new(db);
        let engine = PasswordEngine::new(config.scrypt_log_n)?;
        let auth = AuthService::new(Arc::clone(&db), engine);
        let links = ShortLinkService::new(Arc::clone(&db), &config)?;

        tracing::info!(
            cache_max_entries = config.cache_max_entries,
            cache_ttl_secs = config.cache_ttl.as_secs(),
            "application state initialized"
        );

        Ok(Self {
            config: Arc::new(config),
            db,
            auth: Arc::new(auth),
            links: Arc::new(links),
        })
    }
}
