pub mod auth;
pub mod config;
pub mod db;
pub mod health;
pub mod hellocallers;
pub mod pool;
pub mod routes;

use std::sync::Arc;

use crate::auth::rate_limiter::RateLimiter;
use crate::config::Config;
use crate::db::Database;
use crate::db::session::SessionStore;
use crate::health::HealthChecker;
use crate::hellocallers::{BulkController, LookupExecutor, PayloadEncoder};
use crate::pool::{AccountPool, ProxyPool};

/// Shared application state accessible from all route handlers.
pub struct AppState {
    pub config: Config,
    pub db: Database,
    pub accounts: AccountPool,
    pub proxies: ProxyPool,
    pub sessions: SessionStore,
    pub executor: Arc<LookupExecutor>,
    pub bulk: BulkController,
    pub health: HealthChecker,
    pub rate_limiter: RateLimiter,
}

impl AppState {
    /// Wire every subsystem against an already-migrated database.
    pub fn build(config: Config, db: Database) -> Arc<Self> {
        let accounts = AccountPool::new(db.clone());
        let proxies = ProxyPool::new(db.clone());
        let sessions = SessionStore::new(db.clone());
        let encoder = Arc::new(PayloadEncoder::new());

        let executor = Arc::new(LookupExecutor::new(
            &config,
            accounts.clone(),
            proxies.clone(),
            sessions.clone(),
            encoder,
        ));
        let bulk = BulkController::new(executor.clone(), config.max_bulk_size);
        let health = HealthChecker::new(proxies.clone(), config.health_concurrency);

        Arc::new(Self {
            config,
            db,
            accounts,
            proxies,
            sessions,
            executor,
            bulk,
            health,
            rate_limiter: RateLimiter::new(),
        })
    }
}
