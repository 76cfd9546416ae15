use std::env;

use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// SQLite database URL
    pub database_url: String,
    /// Upstream HelloCallers base URL
    pub upstream_base: String,
    /// Default timeout for lookups when the chosen proxy has no own value
    pub request_timeout_secs: u64,
    /// Hourly rate limit applied to newly created accounts
    pub default_rate_limit: i64,
    /// Hard cap on phone numbers accepted per bulk request
    pub max_bulk_size: usize,
    /// Concurrency bound for the proxy health checker
    pub health_concurrency: usize,
    /// Require API keys on /api/v1 (default: true)
    pub auth_enabled: bool,
    /// Static admin token fallback (for scripts/CI)
    pub admin_token: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            port: env::var("PORT")
                .unwrap_or_else(|_| "8000".into())
                .parse()
                .context("PORT must be a valid u16")?,
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://data/trud.db?mode=rwc".into()),
            upstream_base: env::var("HELLOCALLERS_BASE_URL")
                .unwrap_or_else(|_| "https://hellocallers.com".into()),
            request_timeout_secs: env::var("REQUEST_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".into())
                .parse()
                .unwrap_or(30),
            default_rate_limit: env::var("DEFAULT_RATE_LIMIT")
                .unwrap_or_else(|_| "50".into())
                .parse()
                .unwrap_or(50),
            max_bulk_size: env::var("MAX_BULK_SIZE")
                .unwrap_or_else(|_| "100".into())
                .parse()
                .unwrap_or(100),
            health_concurrency: env::var("HEALTH_CONCURRENCY")
                .unwrap_or_else(|_| "10".into())
                .parse()
                .unwrap_or(10),
            auth_enabled: env::var("AUTH_ENABLED")
                .unwrap_or_else(|_| "true".into())
                .parse()
                .unwrap_or(true),
            admin_token: env::var("ADMIN_TOKEN").ok().filter(|s| !s.is_empty()),
        })
    }
}
