pub mod session;

use anyhow::Result;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;

/// Timestamp format used across all TEXT datetime columns (matches
/// SQLite's `datetime('now')`).
pub const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn now_ts() -> String {
    Utc::now().format(TS_FORMAT).to_string()
}

pub fn format_ts(at: DateTime<Utc>) -> String {
    at.format(TS_FORMAT).to_string()
}

/// Parse a stored TEXT timestamp back into a UTC datetime.
pub fn parse_ts(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, TS_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

#[derive(Debug, Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    pub async fn connect(url: &str) -> Result<Self> {
        // Ensure data directory exists
        if let Some(path) = url.strip_prefix("sqlite://") {
            let path = path.split('?').next().unwrap_or(path);
            if let Some(parent) = std::path::Path::new(path).parent() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let pool = SqlitePool::connect(url).await?;
        Ok(Self { pool })
    }

    /// Single-connection in-memory database. Every handle sees the same
    /// data, which a pooled `:memory:` URL does not guarantee.
    pub async fn connect_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS accounts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                token TEXT NOT NULL,
                device_id TEXT NOT NULL,
                player_id TEXT NOT NULL,
                locale TEXT NOT NULL DEFAULT 'ar',
                country TEXT NOT NULL DEFAULT 'IQ',
                notes TEXT,
                request_count INTEGER NOT NULL DEFAULT 0,
                successful_requests INTEGER NOT NULL DEFAULT 0,
                failed_requests INTEGER NOT NULL DEFAULT 0,
                rate_limit INTEGER NOT NULL DEFAULT 50,
                current_hour_requests INTEGER NOT NULL DEFAULT 0,
                hour_reset_time TEXT,
                last_used TEXT,
                is_active INTEGER NOT NULL DEFAULT 1,
                is_banned INTEGER NOT NULL DEFAULT 0,
                ban_reason TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS proxies (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                host TEXT NOT NULL,
                port INTEGER NOT NULL,
                username TEXT,
                password TEXT,
                proxy_type TEXT NOT NULL DEFAULT 'http',
                country TEXT,
                city TEXT,
                ip_address TEXT,
                total_requests INTEGER NOT NULL DEFAULT 0,
                successful_requests INTEGER NOT NULL DEFAULT 0,
                failed_requests INTEGER NOT NULL DEFAULT 0,
                average_response_time REAL NOT NULL DEFAULT 0,
                last_used TEXT,
                last_check TEXT,
                is_active INTEGER NOT NULL DEFAULT 1,
                is_working INTEGER NOT NULL DEFAULT 1,
                status_message TEXT,
                max_concurrent_requests INTEGER NOT NULL DEFAULT 5,
                timeout INTEGER NOT NULL DEFAULT 30,
                notes TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS sessions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL UNIQUE,
                account_id INTEGER,
                proxy_id INTEGER,
                phone_number TEXT NOT NULL,
                request_type TEXT NOT NULL DEFAULT 'single',
                status TEXT NOT NULL DEFAULT 'pending',
                error_message TEXT,
                response_time REAL NOT NULL DEFAULT 0,
                started_at TEXT,
                completed_at TEXT,
                contact_found INTEGER NOT NULL DEFAULT 0,
                contact_name TEXT,
                carrier_name TEXT,
                country_code TEXT,
                is_spam INTEGER NOT NULL DEFAULT 0,
                payload_used TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            CREATE INDEX IF NOT EXISTS idx_sessions_session_id ON sessions(session_id);
            CREATE INDEX IF NOT EXISTS idx_sessions_phone ON sessions(phone_number);
            CREATE INDEX IF NOT EXISTS idx_sessions_status ON sessions(status);
            CREATE INDEX IF NOT EXISTS idx_sessions_created ON sessions(created_at DESC);

            CREATE TABLE IF NOT EXISTS api_keys (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                key_hash TEXT NOT NULL UNIQUE,
                key_prefix TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                expires_at TEXT,
                rate_limit INTEGER NOT NULL DEFAULT 60,
                usage_count INTEGER NOT NULL DEFAULT 0,
                allowed_ips TEXT,
                last_used TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            CREATE INDEX IF NOT EXISTS idx_api_keys_hash ON api_keys(key_hash);
            "#,
        )
        .execute(&self.pool)
        .await?;

        tracing::info!("Database migrated successfully");
        Ok(())
    }
}
