use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::db::{self, Database};

/// A captured HelloCallers identity: auth token plus the device fingerprint
/// the upstream service associates with it.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Account {
    pub id: i64,
    pub name: String,
    /// JWT bearer token captured from the mobile app. Masked in API responses.
    pub token: String,
    pub device_id: String,
    pub player_id: String,
    pub locale: String,
    pub country: String,
    pub notes: Option<String>,
    pub request_count: i64,
    pub successful_requests: i64,
    pub failed_requests: i64,
    pub rate_limit: i64,
    pub current_hour_requests: i64,
    pub hour_reset_time: Option<String>,
    pub last_used: Option<String>,
    pub is_active: bool,
    pub is_banned: bool,
    pub ban_reason: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Account {
    /// Fraction of requests that succeeded (0.0 when unused).
    pub fn success_rate(&self) -> f64 {
        if self.request_count == 0 {
            return 0.0;
        }
        self.successful_requests as f64 / self.request_count as f64
    }

    pub fn remaining_requests(&self) -> i64 {
        (self.rate_limit - self.current_hour_requests).max(0)
    }

    /// True when the hourly counter window has lapsed and must be reset
    /// before `current_hour_requests` is compared against `rate_limit`.
    pub fn hour_window_expired(&self, now: DateTime<Utc>) -> bool {
        match self.hour_reset_time.as_deref().and_then(db::parse_ts) {
            Some(reset) => now >= reset + Duration::hours(1),
            None => true,
        }
    }

    /// Eligibility predicate, assuming the hour window is already fresh.
    pub fn is_eligible(&self) -> bool {
        self.is_active && !self.is_banned && self.current_hour_requests < self.rate_limit
    }

    /// Masked copy for API responses (token hidden except the edges).
    /// Tokens are opaque text, so the edges are counted in characters,
    /// not bytes.
    pub fn masked(&self) -> Self {
        let masked_token = if self.token.chars().count() > 12 {
            let head: String = self.token.chars().take(8).collect();
            let tail: String = self
                .token
                .chars()
                .rev()
                .take(4)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();
            format!("{head}...{tail}")
        } else {
            "****".to_string()
        };
        Self {
            token: masked_token,
            ..self.clone()
        }
    }
}

/// Weighted fitness score used to pick the next account.
/// Success rate dominates, then remaining hourly allowance, then idle time.
/// Never-used accounts get the full recency bonus.
pub fn score_account(account: &Account, now: DateTime<Utc>) -> f64 {
    let success = account.success_rate();
    let remaining = if account.rate_limit > 0 {
        account.remaining_requests() as f64 / account.rate_limit as f64
    } else {
        0.0
    };
    let recency = match account.last_used.as_deref().and_then(db::parse_ts) {
        Some(last) => {
            let idle_hours = (now - last).num_seconds().max(0) as f64 / 3600.0;
            (idle_hours / 10.0).min(1.0)
        }
        None => 1.0,
    };

    0.5 * success + 0.3 * remaining + 0.2 * recency
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateAccount {
    pub name: String,
    pub token: String,
    pub device_id: String,
    pub player_id: String,
    pub locale: Option<String>,
    pub country: Option<String>,
    pub rate_limit: Option<i64>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct UpdateAccount {
    pub name: Option<String>,
    pub token: Option<String>,
    pub device_id: Option<String>,
    pub player_id: Option<String>,
    pub locale: Option<String>,
    pub country: Option<String>,
    pub rate_limit: Option<i64>,
    pub notes: Option<String>,
}

const ACCOUNT_COLUMNS: &str =
    "id, name, token, device_id, player_id, locale, country, notes, \
     request_count, successful_requests, failed_requests, rate_limit, \
     current_hour_requests, hour_reset_time, last_used, \
     is_active, is_banned, ban_reason, created_at, updated_at";

/// Account store + selector. Counter updates go through `apply_usage`,
/// a single SQL increment, so concurrent lookups sharing an account
/// cannot lose writes.
#[derive(Debug, Clone)]
pub struct AccountPool {
    db: Database,
}

impl AccountPool {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn get(&self, id: i64) -> Result<Option<Account>> {
        let row = sqlx::query_as::<_, Account>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.db.pool)
        .await?;
        Ok(row)
    }

    pub async fn list(&self) -> Result<Vec<Account>> {
        let rows = sqlx::query_as::<_, Account>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts ORDER BY created_at"
        ))
        .fetch_all(&self.db.pool)
        .await?;
        Ok(rows)
    }

    /// Pick an account for the next lookup.
    ///
    /// With an explicit id the account is returned only if it passes the
    /// eligibility predicate; an ineligible explicit choice yields `None`
    /// rather than silently substituting another account.
    pub async fn select(&self, explicit: Option<i64>, now: DateTime<Utc>) -> Result<Option<Account>> {
        if let Some(id) = explicit {
            let Some(mut account) = self.get(id).await? else {
                return Ok(None);
            };
            if !account.is_active || account.is_banned {
                return Ok(None);
            }
            self.refresh_hour_window(&mut account, now).await?;
            return Ok(account.is_eligible().then_some(account));
        }

        let mut candidates = sqlx::query_as::<_, Account>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE is_active = 1 AND is_banned = 0"
        ))
        .fetch_all(&self.db.pool)
        .await?;

        let mut best: Option<(f64, Account)> = None;
        for account in candidates.iter_mut() {
            self.refresh_hour_window(account, now).await?;
            if !account.is_eligible() {
                continue;
            }
            let score = score_account(account, now);
            if best.as_ref().is_none_or(|(s, _)| score > *s) {
                best = Some((score, account.clone()));
            }
        }

        Ok(best.map(|(_, account)| account))
    }

    /// Rotation aid for bulk runs: when the strict filter yields nothing
    /// but accounts exist, fall back to the least-recently-used one.
    pub async fn select_least_recently_used(&self) -> Result<Option<Account>> {
        let row = sqlx::query_as::<_, Account>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts \
             WHERE is_active = 1 AND is_banned = 0 \
             ORDER BY last_used IS NOT NULL, last_used LIMIT 1"
        ))
        .fetch_optional(&self.db.pool)
        .await?;
        Ok(row)
    }

    /// Reset the hourly counter if the window lapsed, persisting the reset
    /// before the caller compares against the rate limit.
    async fn refresh_hour_window(&self, account: &mut Account, now: DateTime<Utc>) -> Result<()> {
        if !account.hour_window_expired(now) {
            return Ok(());
        }
        let now_str = db::format_ts(now);
        sqlx::query(
            "UPDATE accounts SET current_hour_requests = 0, hour_reset_time = ?, \
             updated_at = datetime('now') WHERE id = ?",
        )
        .bind(&now_str)
        .bind(account.id)
        .execute(&self.db.pool)
        .await?;

        account.current_hour_requests = 0;
        account.hour_reset_time = Some(now_str);
        Ok(())
    }

    /// Record one attempt against this account. A single UPDATE keeps the
    /// increments atomic under concurrent bulk lookups.
    pub async fn apply_usage(&self, id: i64, success: bool) -> Result<()> {
        sqlx::query(
            "UPDATE accounts SET \
             request_count = request_count + 1, \
             current_hour_requests = current_hour_requests + 1, \
             successful_requests = successful_requests + CASE WHEN ? THEN 1 ELSE 0 END, \
             failed_requests = failed_requests + CASE WHEN ? THEN 0 ELSE 1 END, \
             last_used = datetime('now'), updated_at = datetime('now') \
             WHERE id = ?",
        )
        .bind(success)
        .bind(success)
        .bind(id)
        .execute(&self.db.pool)
        .await?;
        Ok(())
    }

    pub async fn create(&self, req: &CreateAccount, default_rate_limit: i64) -> Result<Account> {
        let result = sqlx::query(
            "INSERT INTO accounts (name, token, device_id, player_id, locale, country, rate_limit, notes) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&req.name)
        .bind(&req.token)
        .bind(&req.device_id)
        .bind(&req.player_id)
        .bind(req.locale.as_deref().unwrap_or("ar"))
        .bind(req.country.as_deref().unwrap_or("IQ"))
        .bind(req.rate_limit.unwrap_or(default_rate_limit))
        .bind(&req.notes)
        .execute(&self.db.pool)
        .await?;

        let id = result.last_insert_rowid();
        let account = self.get(id).await?;
        account.ok_or_else(|| anyhow::anyhow!("account {id} vanished after insert"))
    }

    pub async fn update(&self, id: i64, patch: &UpdateAccount) -> Result<Option<Account>> {
        sqlx::query(
            "UPDATE accounts SET \
             name = COALESCE(?, name), token = COALESCE(?, token), \
             device_id = COALESCE(?, device_id), player_id = COALESCE(?, player_id), \
             locale = COALESCE(?, locale), country = COALESCE(?, country), \
             rate_limit = COALESCE(?, rate_limit), notes = COALESCE(?, notes), \
             updated_at = datetime('now') WHERE id = ?",
        )
        .bind(&patch.name)
        .bind(&patch.token)
        .bind(&patch.device_id)
        .bind(&patch.player_id)
        .bind(&patch.locale)
        .bind(&patch.country)
        .bind(patch.rate_limit)
        .bind(&patch.notes)
        .bind(id)
        .execute(&self.db.pool)
        .await?;

        self.get(id).await
    }

    pub async fn delete(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM accounts WHERE id = ?")
            .bind(id)
            .execute(&self.db.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn set_active(&self, id: i64, active: bool) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE accounts SET is_active = ?, updated_at = datetime('now') WHERE id = ?",
        )
        .bind(active)
        .bind(id)
        .execute(&self.db.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn set_banned(&self, id: i64, banned: bool, reason: Option<&str>) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE accounts SET is_banned = ?, ban_reason = ?, updated_at = datetime('now') \
             WHERE id = ?",
        )
        .bind(banned)
        .bind(reason)
        .bind(id)
        .execute(&self.db.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Ban accounts whose every attempt has failed (at least 10 tries).
    /// Returns the ids that were banned.
    pub async fn auto_ban_failing(&self) -> Result<Vec<i64>> {
        let rows = sqlx::query_as::<_, (i64,)>(
            "SELECT id FROM accounts \
             WHERE is_active = 1 AND is_banned = 0 \
             AND request_count >= 10 AND successful_requests = 0",
        )
        .fetch_all(&self.db.pool)
        .await?;

        let ids: Vec<i64> = rows.into_iter().map(|(id,)| id).collect();
        for id in &ids {
            self.set_banned(*id, true, Some("auto: all requests failed"))
                .await?;
            tracing::warn!(account_id = id, "Account auto-banned");
        }
        Ok(ids)
    }

    pub async fn stats_summary(&self) -> Result<serde_json::Value> {
        let row = sqlx::query_as::<_, (i64, i64, i64, i64, i64)>(
            "SELECT COALESCE(COUNT(*), 0), \
             COALESCE(SUM(CASE WHEN is_active = 1 AND is_banned = 0 THEN 1 ELSE 0 END), 0), \
             COALESCE(SUM(CASE WHEN is_banned = 1 THEN 1 ELSE 0 END), 0), \
             COALESCE(SUM(request_count), 0), \
             COALESCE(SUM(successful_requests), 0) \
             FROM accounts",
        )
        .fetch_one(&self.db.pool)
        .await?;

        let (total, usable, banned, requests, successes) = row;
        let success_rate = if requests > 0 {
            successes as f64 / requests as f64
        } else {
            0.0
        };
        Ok(serde_json::json!({
            "total_accounts": total,
            "usable_accounts": usable,
            "banned_accounts": banned,
            "total_requests": requests,
            "successful_requests": successes,
            "overall_success_rate": success_rate,
        }))
    }
}
