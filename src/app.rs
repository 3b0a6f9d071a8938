use crate::handlers;
use crate::state::AppState;
use axum::{routing::{get, post}, Router};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/stats/:metric", get(handlers::get_stats))
        .route("/api/stats/:metric/fields", get(handlers::get_fields))
        .route("/api/stats/:metric/summary", get(handlers::get_summary))
        .route("/api/pretty/:metric/:field", get(handlers::get_pretty_name))
        .route("/api/cache/clear", post(handlers::clear_cache))
        .with_state(state)
}
