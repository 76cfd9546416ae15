use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json,
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

use super::api_key;
use super::rate_limiter::RateLimitResult;
use crate::AppState;

/// Authenticated caller identity, injected as request extension.
#[derive(Debug, Clone)]
pub enum Caller {
    /// API key caller
    ApiKey { key_id: i64, name: String },
    /// Admin (env-var token)
    Admin,
    /// Unauthenticated (AUTH_ENABLED=false fallback)
    Anonymous,
}

/// Extract Bearer token from Authorization header.
fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// API key authentication middleware.
///
/// When AUTH_ENABLED=true:
///   - Extracts Bearer token → checks admin_token → checks api_keys table
///   - Enforces active/expiry/IP-allowlist, applies rate limiting,
///     bumps usage counters
///   - Injects Caller as request extension
///
/// When AUTH_ENABLED=false:
///   - Injects Caller::Anonymous
pub async fn api_key_auth(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    if !state.config.auth_enabled {
        request.extensions_mut().insert(Caller::Anonymous);
        return next.run(request).await;
    }

    let token = match extract_bearer(request.headers()) {
        Some(t) => t.to_string(),
        None => {
            return (
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({ "error": "Missing Authorization header" })),
            )
                .into_response();
        }
    };

    // Check env-var admin token first
    if let Some(ref admin_token) = state.config.admin_token {
        if token == *admin_token {
            request.extensions_mut().insert(Caller::Admin);
            return next.run(request).await;
        }
    }

    // Look up API key by hash
    let key_hash = api_key::hash_key(&token);
    let record = match api_key::lookup_by_hash(&state.db.pool, &key_hash).await {
        Ok(Some(r)) => r,
        Ok(None) => {
            return (
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({ "error": "Invalid API key" })),
            )
                .into_response();
        }
        Err(e) => {
            tracing::error!("API key lookup error: {e}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": "Internal error" })),
            )
                .into_response();
        }
    };

    if !record.is_active {
        return (
            StatusCode::FORBIDDEN,
            Json(serde_json::json!({ "error": "API key is disabled" })),
        )
            .into_response();
    }

    if let Some(ref expires_at) = record.expires_at {
        if let Some(exp) = crate::db::parse_ts(expires_at) {
            if chrono::Utc::now() > exp {
                return (
                    StatusCode::FORBIDDEN,
                    Json(serde_json::json!({ "error": "API key has expired" })),
                )
                    .into_response();
            }
        }
    }

    // Source-IP allowlist, when the key carries one
    if let Some(ConnectInfo(addr)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
        if !record.ip_allowed(&addr.ip().to_string()) {
            return (
                StatusCode::FORBIDDEN,
                Json(serde_json::json!({ "error": "Source IP not allowed for this API key" })),
            )
                .into_response();
        }
    }

    // Rate limit check
    let rl_result = state.rate_limiter.check(record.id, record.rate_limit as u32);
    if !rl_result.allowed {
        return rate_limit_response(&rl_result);
    }

    // Update last_used + usage_count (fire-and-forget)
    api_key::touch(&state.db.pool, record.id).await;

    request.extensions_mut().insert(Caller::ApiKey {
        key_id: record.id,
        name: record.name,
    });

    // Add rate limit headers to response
    let mut response = next.run(request).await;
    inject_rate_limit_headers(response.headers_mut(), &rl_result);
    response
}

fn rate_limit_response(rl: &RateLimitResult) -> Response {
    let mut resp = (
        StatusCode::TOO_MANY_REQUESTS,
        Json(serde_json::json!({
            "error": "Rate limit exceeded",
            "retry_after": rl.reset_secs,
        })),
    )
        .into_response();
    inject_rate_limit_headers(resp.headers_mut(), rl);
    resp
}

fn inject_rate_limit_headers(headers: &mut HeaderMap, rl: &RateLimitResult) {
    if rl.limit > 0 {
        headers.insert("X-RateLimit-Limit", rl.limit.into());
        headers.insert("X-RateLimit-Remaining", rl.remaining.into());
        headers.insert("X-RateLimit-Reset", rl.reset_secs.into());
    }
}
