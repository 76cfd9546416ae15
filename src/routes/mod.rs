mod accounts;
mod keys;
mod proxies;
mod search;
mod sessions;

use std::sync::Arc;

use axum::Router;

use crate::AppState;

pub fn api_router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(search::router(state.clone()))
        .merge(accounts::router(state.clone()))
        .merge(proxies::router(state.clone()))
        .merge(sessions::router(state.clone()))
        .merge(keys::router(state))
}
