use anyhow::Result;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::Database;

/// Audit record for one lookup attempt. Terminal statuses are `success`,
/// `failed` and `timeout`; rows start `pending`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SessionRecord {
    pub id: i64,
    pub session_id: String,
    pub account_id: Option<i64>,
    pub proxy_id: Option<i64>,
    pub phone_number: String,
    pub request_type: String,
    pub status: String,
    pub error_message: Option<String>,
    pub response_time: f64,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub contact_found: bool,
    pub contact_name: Option<String>,
    pub carrier_name: Option<String>,
    pub country_code: Option<String>,
    pub is_spam: bool,
    pub payload_used: Option<String>,
    pub created_at: String,
}

/// Outcome written when a session reaches a terminal state.
#[derive(Debug, Clone, Default)]
pub struct SessionOutcome {
    pub status: String,
    pub error_message: Option<String>,
    pub response_time: f64,
    pub contact_found: bool,
    pub contact_name: Option<String>,
    pub carrier_name: Option<String>,
    pub country_code: Option<String>,
    pub is_spam: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionFilter {
    pub status: Option<String>,
    pub phone_number: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

const SESSION_COLUMNS: &str =
    "id, session_id, account_id, proxy_id, phone_number, request_type, status, \
     error_message, response_time, started_at, completed_at, contact_found, \
     contact_name, carrier_name, country_code, is_spam, payload_used, created_at";

#[derive(Debug, Clone)]
pub struct SessionStore {
    db: Database,
}

impl SessionStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn generate_id() -> String {
        let hex = Uuid::new_v4().simple().to_string();
        format!("trud_{}", &hex[..16])
    }

    /// Open a pending session before any resource selection happens, so
    /// even a lookup that dies during selection leaves a trace.
    pub async fn create_pending(&self, phone_number: &str, request_type: &str) -> Result<String> {
        let session_id = Self::generate_id();
        sqlx::query(
            "INSERT INTO sessions (session_id, phone_number, request_type, status, started_at) \
             VALUES (?, ?, ?, 'pending', datetime('now'))",
        )
        .bind(&session_id)
        .bind(phone_number)
        .bind(request_type)
        .execute(&self.db.pool)
        .await?;
        Ok(session_id)
    }

    pub async fn assign_resources(
        &self,
        session_id: &str,
        account_id: Option<i64>,
        proxy_id: Option<i64>,
        payload_used: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE sessions SET account_id = ?, proxy_id = ?, payload_used = ? \
             WHERE session_id = ?",
        )
        .bind(account_id)
        .bind(proxy_id)
        .bind(payload_used)
        .bind(session_id)
        .execute(&self.db.pool)
        .await?;
        Ok(())
    }

    /// Move a session to its terminal state. The `status = 'pending'` guard
    /// makes the transition happen at most once; a second writer is a no-op.
    pub async fn complete(&self, session_id: &str, outcome: &SessionOutcome) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE sessions SET status = ?, error_message = ?, response_time = ?, \
             contact_found = ?, contact_name = ?, carrier_name = ?, country_code = ?, \
             is_spam = ?, completed_at = datetime('now') \
             WHERE session_id = ? AND status = 'pending'",
        )
        .bind(&outcome.status)
        .bind(&outcome.error_message)
        .bind(outcome.response_time)
        .bind(outcome.contact_found)
        .bind(&outcome.contact_name)
        .bind(&outcome.carrier_name)
        .bind(&outcome.country_code)
        .bind(outcome.is_spam)
        .bind(session_id)
        .execute(&self.db.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        let row = sqlx::query_as::<_, SessionRecord>(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE session_id = ?"
        ))
        .bind(session_id)
        .fetch_optional(&self.db.pool)
        .await?;
        Ok(row)
    }

    pub async fn list(&self, filter: &SessionFilter) -> Result<Vec<SessionRecord>> {
        let limit = filter.limit.unwrap_or(50).clamp(1, 500);
        let offset = filter.offset.unwrap_or(0).max(0);

        let rows = sqlx::query_as::<_, SessionRecord>(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions \
             WHERE (? IS NULL OR status = ?) \
             AND (? IS NULL OR phone_number = ?) \
             ORDER BY created_at DESC LIMIT ? OFFSET ?"
        ))
        .bind(&filter.status)
        .bind(&filter.status)
        .bind(&filter.phone_number)
        .bind(&filter.phone_number)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.db.pool)
        .await?;
        Ok(rows)
    }

    pub async fn delete(&self, session_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM sessions WHERE session_id = ?")
            .bind(session_id)
            .execute(&self.db.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Purge completed sessions older than `older_than_hours`. Pending rows
    /// are never swept so in-flight lookups keep their audit row.
    pub async fn cleanup(&self, older_than_hours: i64) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM sessions WHERE status != 'pending' \
             AND created_at < datetime('now', '-' || ? || ' hours')",
        )
        .bind(older_than_hours)
        .execute(&self.db.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn stats_summary(&self) -> Result<serde_json::Value> {
        let row = sqlx::query_as::<_, (i64, i64, i64, i64, i64, i64, f64)>(
            "SELECT COALESCE(COUNT(*), 0), \
             COALESCE(SUM(CASE WHEN status = 'success' THEN 1 ELSE 0 END), 0), \
             COALESCE(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), 0), \
             COALESCE(SUM(CASE WHEN status = 'timeout' THEN 1 ELSE 0 END), 0), \
             COALESCE(SUM(CASE WHEN status = 'pending' THEN 1 ELSE 0 END), 0), \
             COALESCE(SUM(contact_found), 0), \
             COALESCE(AVG(CASE WHEN response_time > 0 THEN response_time END), 0) \
             FROM sessions",
        )
        .fetch_one(&self.db.pool)
        .await?;

        let (total, success, failed, timeout, pending, contacts, avg_rt) = row;
        let completed = success + failed + timeout;
        let success_rate = if completed > 0 {
            success as f64 / completed as f64
        } else {
            0.0
        };

        let top_numbers = sqlx::query_as::<_, (String, i64)>(
            "SELECT phone_number, COUNT(*) as c FROM sessions \
             GROUP BY phone_number ORDER BY c DESC LIMIT 10",
        )
        .fetch_all(&self.db.pool)
        .await?;

        Ok(serde_json::json!({
            "total_sessions": total,
            "successful": success,
            "failed": failed,
            "timeout": timeout,
            "pending": pending,
            "contacts_found": contacts,
            "success_rate": success_rate,
            "average_response_time": avg_rt,
            "top_phone_numbers": top_numbers
                .into_iter()
                .map(|(phone, count)| serde_json::json!({"phone_number": phone, "count": count}))
                .collect::<Vec<_>>(),
        }))
    }
}
