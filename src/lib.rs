pub mod api;
pub mod cli;
pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod organization;
pub mod review;
pub mod ride;

pub use db::DbPool;

use config::Config;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::api::auth::IdentityVerifier;
use crate::api::rate_limit::RateLimiter;

pub struct AppState {
    pub config: Config,
    pub db: DbPool,
    pub identity: Arc<dyn IdentityVerifier>,
    pub rate_limiter: Arc<RateLimiter>,
    /// Serializes ride and membership mutations; held from the first read of
    /// a check until its transaction commits
    pub ride_writes: Mutex<()>,
}

impl AppState {
    pub fn new(config: Config, db: DbPool, identity: Arc<dyn IdentityVerifier>) -> Self {
        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
        Self {
            config,
            db,
            identity,
            rate_limiter,
            ride_writes: Mutex::new(()),
        }
    }
}
