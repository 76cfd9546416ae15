use std::net::SocketAddr;

use axum::{Json, Router, middleware, routing::get};
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use trud_gateway::auth::middleware::api_key_auth;
use trud_gateway::config::Config;
use trud_gateway::db::Database;
use trud_gateway::{AppState, routes};

async fn health_endpoint() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logging
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "trud_gateway=debug,tower_http=info".into()),
        )
        .with(fmt::layer().with_target(true))
        .init();

    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    tracing::info!(
        port = config.port,
        upstream = %config.upstream_base,
        auth_enabled = config.auth_enabled,
        "Starting trud-gateway"
    );

    // Initialize subsystems
    let db = Database::connect(&config.database_url).await?;
    db.migrate().await?;

    let port = config.port;
    let state = AppState::build(config, db);

    // API routes — protected by API key middleware
    let api_router = routes::api_router(state.clone())
        .route_layer(middleware::from_fn_with_state(state.clone(), api_key_auth));

    let app = Router::new()
        .route("/health", get(health_endpoint))
        .nest("/api/v1", api_router)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(format!("0.0.0.0:{port}")).await?;
    tracing::info!("Listening on 0.0.0.0:{port}");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
