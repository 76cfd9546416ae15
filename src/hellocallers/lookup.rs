use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;

use crate::config::Config;
use crate::db::session::{SessionOutcome, SessionStore};
use crate::pool::{AccountPool, ProxyPool};

use super::parse::{self, ContactInfo};
use super::payload::{DeviceContext, PayloadEncoder, clean_phone};

/// Endpoint paths tried in order; only a network-level failure moves to the
/// next one, any HTTP response stops the walk.
pub const CANDIDATE_ENDPOINTS: &[&str] =
    &["/api/user/histories/all", "/api/search", "/api/phone/lookup"];

#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error("no available accounts")]
    NoAccounts,
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("all endpoints unreachable: {0}")]
    Network(String),
    #[error("malformed response body: {0}")]
    Parse(String),
}

impl LookupError {
    /// Terminal session status this failure maps to.
    pub fn status(&self) -> &'static str {
        match self {
            LookupError::Timeout(_) => "timeout",
            _ => "failed",
        }
    }
}

/// What one lookup produced, structured for both the session row and the
/// API response. Failures live here too; the executor never bubbles them.
#[derive(Debug, Clone, Serialize)]
pub struct SearchOutcome {
    pub success: bool,
    pub phone_number: String,
    pub session_id: String,
    pub status: String,
    pub contact: Option<ContactInfo>,
    pub error: Option<String>,
    pub account_id: Option<i64>,
    pub proxy_id: Option<i64>,
    pub response_time: f64,
}

#[derive(Debug, Clone)]
pub struct LookupExecutor {
    base_url: String,
    default_timeout: Duration,
    accounts: AccountPool,
    proxies: ProxyPool,
    sessions: SessionStore,
    encoder: Arc<PayloadEncoder>,
}

impl LookupExecutor {
    pub fn new(
        config: &Config,
        accounts: AccountPool,
        proxies: ProxyPool,
        sessions: SessionStore,
        encoder: Arc<PayloadEncoder>,
    ) -> Self {
        Self {
            base_url: config.upstream_base.trim_end_matches('/').to_string(),
            default_timeout: Duration::from_secs(config.request_timeout_secs),
            accounts,
            proxies,
            sessions,
            encoder,
        }
    }

    /// Run one lookup end to end. Only persistence errors surface as `Err`;
    /// every upstream failure becomes a structured `SearchOutcome`.
    pub async fn search(
        &self,
        phone: &str,
        account_id: Option<i64>,
        proxy_id: Option<i64>,
        request_type: &str,
    ) -> Result<SearchOutcome> {
        let phone = clean_phone(phone);
        let session_id = self.sessions.create_pending(&phone, request_type).await?;
        let started = Instant::now();
        let now = Utc::now();

        let mut selected = self.accounts.select(account_id, now).await?;
        if selected.is_none() && account_id.is_none() && request_type == "bulk" {
            // Rotation aid: a bulk batch keeps moving on the least-recently
            // used account instead of failing the whole tail of the batch.
            selected = self.accounts.select_least_recently_used().await?;
        }
        let Some(account) = selected else {
            let outcome = self
                .fail(&session_id, &phone, None, None, 0.0, &LookupError::NoAccounts)
                .await?;
            return Ok(outcome);
        };

        // Proxy absence is tolerated, the lookup goes out directly.
        let proxy = self.proxies.select(proxy_id, now).await?;
        let proxy_ref = proxy.as_ref();

        let ctx = DeviceContext::from_account(&account);
        let encoded = self.encoder.encode(&phone, &ctx);
        self.sessions
            .assign_resources(
                &session_id,
                Some(account.id),
                proxy_ref.map(|p| p.id),
                Some(&encoded.payload),
            )
            .await?;

        let timeout = proxy_ref
            .map(|p| Duration::from_secs(p.timeout.max(1) as u64))
            .unwrap_or(self.default_timeout);

        let attempt = self
            .attempt_candidates(&encoded.payload, &encoded.headers, proxy_ref, timeout)
            .await;
        let elapsed = started.elapsed().as_secs_f64();

        let outcome = match attempt {
            Ok((http_status, body)) => {
                let success = parse::determine_success(http_status, &body);
                let contact = body.get("data").and_then(parse::extract_contact);
                let error = (!success)
                    .then(|| parse::extract_error_message(&body, http_status));

                self.sessions
                    .complete(
                        &session_id,
                        &SessionOutcome {
                            status: if success { "success" } else { "failed" }.into(),
                            error_message: error.clone(),
                            response_time: elapsed,
                            contact_found: contact.is_some(),
                            contact_name: contact.as_ref().and_then(|c| c.name.clone()),
                            carrier_name: contact.as_ref().and_then(|c| c.carrier.clone()),
                            country_code: contact.as_ref().and_then(|c| c.country_code.clone()),
                            is_spam: contact.as_ref().is_some_and(|c| c.is_spam),
                        },
                    )
                    .await?;

                self.accounts.apply_usage(account.id, success).await?;
                if let Some(p) = proxy_ref {
                    self.proxies.apply_usage(p.id, success, elapsed).await?;
                }

                SearchOutcome {
                    success,
                    phone_number: phone.clone(),
                    session_id: session_id.clone(),
                    status: if success { "success" } else { "failed" }.into(),
                    contact,
                    error,
                    account_id: Some(account.id),
                    proxy_id: proxy_ref.map(|p| p.id),
                    response_time: elapsed,
                }
            }
            Err(err) => {
                // Account usage counts even when the network never answered;
                // the account carried the attempt.
                self.accounts.apply_usage(account.id, false).await?;
                if let Some(p) = proxy_ref {
                    self.proxies.apply_usage(p.id, false, elapsed).await?;
                }
                self.fail(
                    &session_id,
                    &phone,
                    Some(account.id),
                    proxy_ref.map(|p| p.id),
                    elapsed,
                    &err,
                )
                .await?
            }
        };

        tracing::info!(
            phone = %outcome.phone_number,
            session = %outcome.session_id,
            status = %outcome.status,
            elapsed_secs = outcome.response_time,
            "Lookup finished"
        );
        Ok(outcome)
    }

    /// Walk the candidate endpoints. Network failures advance, the first
    /// HTTP response wins even if it is a 4xx/5xx.
    async fn attempt_candidates(
        &self,
        payload: &str,
        headers: &std::collections::HashMap<String, String>,
        proxy: Option<&crate::pool::proxy::Proxy>,
        timeout: Duration,
    ) -> Result<(u16, Value), LookupError> {
        let mut builder = reqwest::Client::builder().timeout(timeout);
        if let Some(p) = proxy {
            let rp = reqwest::Proxy::all(p.proxy_url())
                .map_err(|e| LookupError::Network(format!("bad proxy url: {e}")))?;
            builder = builder.proxy(rp);
        }
        let client = builder
            .build()
            .map_err(|e| LookupError::Network(format!("client build: {e}")))?;

        let mut last_err: Option<LookupError> = None;
        for path in CANDIDATE_ENDPOINTS {
            let url = format!("{}{path}", self.base_url);
            let mut request = client.post(&url).form(&[("payload", payload)]);
            for (name, value) in headers {
                request = request.header(name, value);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    let body: Value = match response.json().await {
                        Ok(body) => body,
                        Err(e) => return Err(LookupError::Parse(e.to_string())),
                    };
                    return Ok((status, body));
                }
                Err(e) => {
                    tracing::debug!(endpoint = path, error = %e, "Candidate endpoint unreachable");
                    last_err = Some(if e.is_timeout() {
                        LookupError::Timeout(e.to_string())
                    } else {
                        LookupError::Network(e.to_string())
                    });
                }
            }
        }

        Err(last_err.unwrap_or_else(|| LookupError::Network("no candidate endpoints".into())))
    }

    async fn fail(
        &self,
        session_id: &str,
        phone: &str,
        account_id: Option<i64>,
        proxy_id: Option<i64>,
        elapsed: f64,
        err: &LookupError,
    ) -> Result<SearchOutcome> {
        let status = err.status();
        self.sessions
            .complete(
                session_id,
                &SessionOutcome {
                    status: status.into(),
                    error_message: Some(err.to_string()),
                    response_time: elapsed,
                    ..Default::default()
                },
            )
            .await?;

        Ok(SearchOutcome {
            success: false,
            phone_number: phone.to_string(),
            session_id: session_id.to_string(),
            status: status.into(),
            contact: None,
            error: Some(err.to_string()),
            account_id,
            proxy_id,
            response_time: elapsed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_maps_to_timeout_status() {
        assert_eq!(LookupError::Timeout("t".into()).status(), "timeout");
        assert_eq!(LookupError::Network("n".into()).status(), "failed");
        assert_eq!(LookupError::NoAccounts.status(), "failed");
        assert_eq!(LookupError::Parse("p".into()).status(), "failed");
    }

    #[test]
    fn primary_endpoint_comes_first() {
        assert_eq!(CANDIDATE_ENDPOINTS[0], "/api/user/histories/all");
        assert_eq!(CANDIDATE_ENDPOINTS.len(), 3);
    }
}
