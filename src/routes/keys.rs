use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::get,
};
use serde::Deserialize;

use crate::AppState;
use crate::auth::api_key::{self, UpdateApiKey};

fn internal(e: anyhow::Error) -> (StatusCode, Json<serde_json::Value>) {
    tracing::error!("API key store error: {e}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "error": "Internal error" })),
    )
}

fn not_found() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "error": "API key not found" })),
    )
}

#[derive(Deserialize)]
struct CreateKeyRequest {
    name: String,
    rate_limit: Option<i64>,
    expires_at: Option<String>,
    allowed_ips: Option<String>,
}

/// The raw key appears only in this response; afterwards only the hash
/// exists.
async fn create_key(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateKeyRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), (StatusCode, Json<serde_json::Value>)> {
    let (raw_key, record) = api_key::create(
        &state.db.pool,
        &req.name,
        req.rate_limit.unwrap_or(60),
        req.expires_at.as_deref(),
        req.allowed_ips.as_deref(),
    )
    .await
    .map_err(internal)?;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "api_key": raw_key, "record": record })),
    ))
}

async fn list_keys(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let keys = api_key::list_all(&state.db.pool).await.map_err(internal)?;
    Ok(Json(serde_json::json!({ "keys": keys })))
}

async fn get_key(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    match api_key::get_by_id(&state.db.pool, id).await.map_err(internal)? {
        Some(record) => Ok(Json(serde_json::json!({ "key": record }))),
        None => Err(not_found()),
    }
}

async fn update_key(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(patch): Json<UpdateApiKey>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    if api_key::update(&state.db.pool, id, &patch)
        .await
        .map_err(internal)?
    {
        Ok(Json(serde_json::json!({ "ok": true })))
    } else {
        Err(not_found())
    }
}

async fn delete_key(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    if api_key::delete(&state.db.pool, id).await.map_err(internal)? {
        state.rate_limiter.remove(id);
        Ok(Json(serde_json::json!({ "ok": true })))
    } else {
        Err(not_found())
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/keys", get(list_keys).post(create_key))
        .route("/keys/{id}", get(get_key).put(update_key).delete(delete_key))
        .with_state(state)
}
