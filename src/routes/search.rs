use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::post,
};
use serde::Deserialize;

use crate::AppState;
use crate::hellocallers::bulk::BulkRequest;

#[derive(Deserialize)]
struct SearchRequest {
    phone_number: String,
    account_id: Option<i64>,
    proxy_id: Option<i64>,
}

/// Single lookup. Upstream failures come back as 404 with the extracted
/// error message; only internal faults are 500.
async fn search_phone(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    if req.phone_number.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "phone_number is required" })),
        ));
    }

    let outcome = state
        .executor
        .search(&req.phone_number, req.account_id, req.proxy_id, "single")
        .await
        .map_err(|e| {
            tracing::error!("Lookup failed internally: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": "Internal error" })),
            )
        })?;

    if outcome.success {
        Ok(Json(serde_json::to_value(&outcome).unwrap_or_default()))
    } else {
        Err((
            StatusCode::NOT_FOUND,
            Json(serde_json::to_value(&outcome).unwrap_or_default()),
        ))
    }
}

/// Bulk lookup. Always 200 once the input validates; per-item success and
/// failure live inside the aggregate body.
async fn search_bulk(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BulkRequest>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let outcome = state.bulk.run(&req).await.map_err(|message| {
        (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": message })),
        )
    })?;

    Ok(Json(serde_json::to_value(&outcome).unwrap_or_default()))
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/search/phone", post(search_phone))
        .route("/search/bulk", post(search_bulk))
        .with_state(state)
}
