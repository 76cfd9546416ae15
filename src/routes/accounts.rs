use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use serde::Deserialize;

use crate::AppState;
use crate::pool::account::{CreateAccount, UpdateAccount};

fn internal(e: anyhow::Error) -> (StatusCode, Json<serde_json::Value>) {
    tracing::error!("Account store error: {e}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "error": "Internal error" })),
    )
}

async fn list_accounts(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let accounts: Vec<_> = state
        .accounts
        .list()
        .await
        .map_err(internal)?
        .into_iter()
        .map(|a| a.masked())
        .collect();
    Ok(Json(serde_json::json!({ "accounts": accounts })))
}

async fn get_account(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    match state.accounts.get(id).await.map_err(internal)? {
        Some(account) => Ok(Json(serde_json::json!({ "account": account.masked() }))),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "Account not found" })),
        )),
    }
}

async fn create_account(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateAccount>,
) -> Result<(StatusCode, Json<serde_json::Value>), (StatusCode, Json<serde_json::Value>)> {
    let account = state
        .accounts
        .create(&req, state.config.default_rate_limit)
        .await
        .map_err(internal)?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "account": account.masked() })),
    ))
}

async fn update_account(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(patch): Json<UpdateAccount>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    match state.accounts.update(id, &patch).await.map_err(internal)? {
        Some(account) => Ok(Json(serde_json::json!({ "account": account.masked() }))),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "Account not found" })),
        )),
    }
}

async fn delete_account(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    if state.accounts.delete(id).await.map_err(internal)? {
        Ok(Json(serde_json::json!({ "ok": true })))
    } else {
        Err((
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "Account not found" })),
        ))
    }
}

#[derive(Deserialize)]
struct ToggleRequest {
    is_active: bool,
}

async fn toggle_account(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(req): Json<ToggleRequest>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    if state
        .accounts
        .set_active(id, req.is_active)
        .await
        .map_err(internal)?
    {
        Ok(Json(serde_json::json!({ "ok": true, "is_active": req.is_active })))
    } else {
        Err((
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "Account not found" })),
        ))
    }
}

#[derive(Deserialize)]
struct BanRequest {
    is_banned: bool,
    reason: Option<String>,
}

async fn ban_account(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(req): Json<BanRequest>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    if state
        .accounts
        .set_banned(id, req.is_banned, req.reason.as_deref())
        .await
        .map_err(internal)?
    {
        Ok(Json(serde_json::json!({ "ok": true, "is_banned": req.is_banned })))
    } else {
        Err((
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "Account not found" })),
        ))
    }
}

/// Ban every account that has only ever failed.
async fn auto_ban(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let banned = state.accounts.auto_ban_failing().await.map_err(internal)?;
    Ok(Json(serde_json::json!({
        "banned_count": banned.len(),
        "banned_ids": banned,
    })))
}

async fn stats_summary(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let stats = state.accounts.stats_summary().await.map_err(internal)?;
    Ok(Json(stats))
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/accounts", get(list_accounts).post(create_account))
        .route(
            "/accounts/{id}",
            get(get_account).put(update_account).delete(delete_account),
        )
        .route("/accounts/{id}/toggle", post(toggle_account))
        .route("/accounts/{id}/ban", post(ban_account))
        .route("/accounts/auto-ban", post(auto_ban))
        .route("/accounts/stats/summary", get(stats_summary))
        .with_state(state)
}
