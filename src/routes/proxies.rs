use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use serde::Deserialize;

use crate::AppState;
use crate::pool::proxy::{CreateProxy, UpdateProxy};

fn internal(e: anyhow::Error) -> (StatusCode, Json<serde_json::Value>) {
    tracing::error!("Proxy store error: {e}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "error": "Internal error" })),
    )
}

fn not_found() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "error": "Proxy not found" })),
    )
}

async fn list_proxies(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let proxies = state.proxies.list().await.map_err(internal)?;
    Ok(Json(serde_json::json!({ "proxies": proxies })))
}

async fn get_proxy(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    match state.proxies.get(id).await.map_err(internal)? {
        Some(proxy) => Ok(Json(serde_json::json!({ "proxy": proxy }))),
        None => Err(not_found()),
    }
}

async fn create_proxy(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateProxy>,
) -> Result<(StatusCode, Json<serde_json::Value>), (StatusCode, Json<serde_json::Value>)> {
    let proxy = state.proxies.create(&req).await.map_err(internal)?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "proxy": proxy })),
    ))
}

async fn update_proxy(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(patch): Json<UpdateProxy>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    match state.proxies.update(id, &patch).await.map_err(internal)? {
        Some(proxy) => Ok(Json(serde_json::json!({ "proxy": proxy }))),
        None => Err(not_found()),
    }
}

async fn delete_proxy(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    if state.proxies.delete(id).await.map_err(internal)? {
        Ok(Json(serde_json::json!({ "ok": true })))
    } else {
        Err(not_found())
    }
}

#[derive(Deserialize)]
struct ToggleRequest {
    is_active: bool,
}

async fn toggle_proxy(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(req): Json<ToggleRequest>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    if state
        .proxies
        .set_active(id, req.is_active)
        .await
        .map_err(internal)?
    {
        Ok(Json(serde_json::json!({ "ok": true, "is_active": req.is_active })))
    } else {
        Err(not_found())
    }
}

/// Probe a single proxy and persist the verdict.
async fn test_proxy(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let Some(proxy) = state.proxies.get(id).await.map_err(internal)? else {
        return Err(not_found());
    };

    let result = state.health.test_proxy(&proxy).await;
    let message = result
        .error_message
        .clone()
        .unwrap_or_else(|| "ok".to_string());
    state
        .proxies
        .write_check_result(
            result.proxy_id,
            result.working,
            result.response_time,
            result.ip_address.as_deref(),
            &message,
        )
        .await
        .map_err(internal)?;

    Ok(Json(serde_json::to_value(&result).unwrap_or_default()))
}

async fn test_all_proxies(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let results = state.health.test_all_proxies().await.map_err(internal)?;
    let working = results.iter().filter(|r| r.working).count();
    Ok(Json(serde_json::json!({
        "tested": results.len(),
        "working": working,
        "results": results,
    })))
}

async fn health_check(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let report = state.health.run_health_check().await.map_err(internal)?;
    Ok(Json(report))
}

/// Trip the circuit breaker without re-probing everything first.
async fn optimize(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let disabled = state.proxies.auto_disable_bad().await.map_err(internal)?;
    Ok(Json(serde_json::json!({
        "disabled_count": disabled.len(),
        "disabled_ids": disabled,
    })))
}

#[derive(Deserialize)]
struct BulkImportRequest {
    /// Lines in `host:port` or `host:port:user:pass` form.
    proxies: Vec<String>,
    proxy_type: Option<String>,
}

async fn bulk_import(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BulkImportRequest>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    if req.proxies.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "proxies must not be empty" })),
        ));
    }

    let (imported, rejected) = state
        .proxies
        .bulk_import(&req.proxies, req.proxy_type.as_deref().unwrap_or("http"))
        .await
        .map_err(internal)?;

    Ok(Json(serde_json::json!({
        "imported": imported,
        "rejected": rejected,
    })))
}

async fn stats_summary(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let stats = state.proxies.stats_summary().await.map_err(internal)?;
    Ok(Json(stats))
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/proxies", get(list_proxies).post(create_proxy))
        .route(
            "/proxies/{id}",
            get(get_proxy).put(update_proxy).delete(delete_proxy),
        )
        .route("/proxies/{id}/toggle", post(toggle_proxy))
        .route("/proxies/{id}/test", post(test_proxy))
        .route("/proxies/test-all", post(test_all_proxies))
        .route("/proxies/health-check", post(health_check))
        .route("/proxies/optimize", post(optimize))
        .route("/proxies/bulk-import", post(bulk_import))
        .route("/proxies/stats/summary", get(stats_summary))
        .with_state(state)
}
