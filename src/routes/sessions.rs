use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
};
use serde::Deserialize;

use crate::AppState;
use crate::db::session::SessionFilter;

fn internal(e: anyhow::Error) -> (StatusCode, Json<serde_json::Value>) {
    tracing::error!("Session store error: {e}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "error": "Internal error" })),
    )
}

async fn list_sessions(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<SessionFilter>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let sessions = state.sessions.list(&filter).await.map_err(internal)?;
    Ok(Json(serde_json::json!({ "sessions": sessions })))
}

async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    match state.sessions.get(&session_id).await.map_err(internal)? {
        Some(session) => Ok(Json(serde_json::json!({ "session": session }))),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "Session not found" })),
        )),
    }
}

async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    if state.sessions.delete(&session_id).await.map_err(internal)? {
        Ok(Json(serde_json::json!({ "ok": true })))
    } else {
        Err((
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "Session not found" })),
        ))
    }
}

#[derive(Deserialize)]
struct CleanupRequest {
    /// Completed sessions older than this are purged.
    older_than_hours: Option<i64>,
}

async fn cleanup_sessions(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CleanupRequest>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let hours = req.older_than_hours.unwrap_or(24 * 7).max(1);
    let removed = state.sessions.cleanup(hours).await.map_err(internal)?;
    Ok(Json(serde_json::json!({
        "removed": removed,
        "older_than_hours": hours,
    })))
}

async fn stats_summary(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let stats = state.sessions.stats_summary().await.map_err(internal)?;
    Ok(Json(stats))
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/sessions", get(list_sessions))
        .route("/sessions/{session_id}", get(get_session).delete(delete_session))
        .route("/sessions/cleanup", post(cleanup_sessions))
        .route("/sessions/stats/summary", get(stats_summary))
        .with_state(state)
}
