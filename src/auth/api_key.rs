use anyhow::Result;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;

/// API key format: trud_<32 hex chars> (37 chars total).
const KEY_PREFIX: &str = "trud_";

/// Generate a new random API key.
pub fn generate_key() -> String {
    use rand::Rng;
    let mut rng = rand::rng();
    let bytes: [u8; 16] = rng.random();
    format!("{}{}", KEY_PREFIX, hex::encode(bytes))
}

/// SHA256 hash of a raw API key (for storage / lookup).
pub fn hash_key(raw: &str) -> String {
    let digest = Sha256::digest(raw.as_bytes());
    hex::encode(digest)
}

/// Display prefix from a raw key (first 10 chars, e.g. "trud_a1b2c").
pub fn key_prefix(raw: &str) -> String {
    raw.chars().take(10).collect()
}

/// Stored API key record. The hash never leaves the database.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ApiKeyRecord {
    pub id: i64,
    pub name: String,
    pub key_prefix: String,
    pub is_active: bool,
    pub expires_at: Option<String>,
    pub rate_limit: i64,
    pub usage_count: i64,
    pub allowed_ips: Option<String>,
    pub last_used: Option<String>,
    pub created_at: String,
}

impl ApiKeyRecord {
    /// allowed_ips is a comma-separated list; empty/NULL means any source.
    pub fn ip_allowed(&self, remote: &str) -> bool {
        match self.allowed_ips.as_deref() {
            None | Some("") => true,
            Some(list) => list.split(',').any(|ip| ip.trim() == remote),
        }
    }
}

const KEY_COLUMNS: &str = "id, name, key_prefix, is_active, expires_at, rate_limit, \
                           usage_count, allowed_ips, last_used, created_at";

/// Look up an API key by its SHA256 hash.
pub async fn lookup_by_hash(db: &SqlitePool, key_hash: &str) -> Result<Option<ApiKeyRecord>> {
    let row = sqlx::query_as::<_, ApiKeyRecord>(&format!(
        "SELECT {KEY_COLUMNS} FROM api_keys WHERE key_hash = ?"
    ))
    .bind(key_hash)
    .fetch_optional(db)
    .await?;
    Ok(row)
}

/// Record one authorized request against a key.
pub async fn touch(db: &SqlitePool, key_id: i64) {
    let _ = sqlx::query(
        "UPDATE api_keys SET last_used = datetime('now'), usage_count = usage_count + 1 \
         WHERE id = ?",
    )
    .bind(key_id)
    .execute(db)
    .await;
}

/// Create a new API key. Returns (raw_key, record); the raw key is shown
/// exactly once.
pub async fn create(
    db: &SqlitePool,
    name: &str,
    rate_limit: i64,
    expires_at: Option<&str>,
    allowed_ips: Option<&str>,
) -> Result<(String, ApiKeyRecord)> {
    let raw_key = generate_key();
    let hash = hash_key(&raw_key);
    let prefix = key_prefix(&raw_key);

    let result = sqlx::query(
        "INSERT INTO api_keys (name, key_hash, key_prefix, rate_limit, expires_at, allowed_ips) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(name)
    .bind(&hash)
    .bind(&prefix)
    .bind(rate_limit)
    .bind(expires_at)
    .bind(allowed_ips)
    .execute(db)
    .await?;

    let id = result.last_insert_rowid();
    let record = get_by_id(db, id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("api key {id} vanished after insert"))?;
    Ok((raw_key, record))
}

pub async fn list_all(db: &SqlitePool) -> Result<Vec<ApiKeyRecord>> {
    let rows = sqlx::query_as::<_, ApiKeyRecord>(&format!(
        "SELECT {KEY_COLUMNS} FROM api_keys ORDER BY created_at DESC"
    ))
    .fetch_all(db)
    .await?;
    Ok(rows)
}

pub async fn get_by_id(db: &SqlitePool, id: i64) -> Result<Option<ApiKeyRecord>> {
    let row = sqlx::query_as::<_, ApiKeyRecord>(&format!(
        "SELECT {KEY_COLUMNS} FROM api_keys WHERE id = ?"
    ))
    .bind(id)
    .fetch_optional(db)
    .await?;
    Ok(row)
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateApiKey {
    pub name: Option<String>,
    pub is_active: Option<bool>,
    pub rate_limit: Option<i64>,
    pub expires_at: Option<String>,
    pub allowed_ips: Option<String>,
}

pub async fn update(db: &SqlitePool, id: i64, patch: &UpdateApiKey) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE api_keys SET name = COALESCE(?, name), is_active = COALESCE(?, is_active), \
         rate_limit = COALESCE(?, rate_limit), expires_at = COALESCE(?, expires_at), \
         allowed_ips = COALESCE(?, allowed_ips) WHERE id = ?",
    )
    .bind(&patch.name)
    .bind(patch.is_active)
    .bind(patch.rate_limit)
    .bind(&patch.expires_at)
    .bind(&patch.allowed_ips)
    .bind(id)
    .execute(db)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn delete(db: &SqlitePool, id: i64) -> Result<bool> {
    let result = sqlx::query("DELETE FROM api_keys WHERE id = ?")
        .bind(id)
        .execute(db)
        .await?;
    Ok(result.rows_affected() > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_have_prefix_and_length() {
        let key = generate_key();
        assert!(key.starts_with("trud_"));
        assert_eq!(key.len(), 37);
    }

    #[test]
    fn hash_is_stable_and_hex() {
        let a = hash_key("trud_abc");
        let b = hash_key("trud_abc");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn ip_allowlist_semantics() {
        let mut record = ApiKeyRecord {
            id: 1,
            name: "k".into(),
            key_prefix: "trud_aaaa".into(),
            is_active: true,
            expires_at: None,
            rate_limit: 60,
            usage_count: 0,
            allowed_ips: None,
            last_used: None,
            created_at: "2025-01-01 00:00:00".into(),
        };
        assert!(record.ip_allowed("10.0.0.1"));
        record.allowed_ips = Some("10.0.0.1, 192.168.1.5".into());
        assert!(record.ip_allowed("10.0.0.1"));
        assert!(record.ip_allowed("192.168.1.5"));
        assert!(!record.ip_allowed("8.8.8.8"));
    }
}
