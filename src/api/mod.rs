use crate::ups::UpsController;
use axum::Router;
use axum::routing::get;
use std::sync::Arc;

pub mod handlers;
pub mod responses;

/// Read-only status routes. Any other method on these paths gets 405.
pub fn router(controller: Arc<UpsController>) -> Router {
    Router::new()
        .route("/api/status", get(handlers::get_status))
        .route("/api/health", get(handlers::get_health))
        .with_state(controller)
}
