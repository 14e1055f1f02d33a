//! `api` crate — HTTP REST surface over the orchestration engine.
//!
//! Exposes:
//!   POST /api/v1/workflows/execute      — run synchronously, return the run
//!   POST /api/v1/workflows/submit      — run in the background, return run_id
//!   GET  /api/v1/runs                  — list stored run records
//!   GET  /api/v1/runs/{id}             — latest snapshot of one run
//!   GET  /api/v1/runs/{id}/trace       — trace log (optional ?step_id= filter)
//!   POST /api/v1/runs/{id}/cancel      — request cooperative cancellation

pub mod error;
pub mod handlers;

pub use error::ApiError;
pub use handlers::AppState;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/workflows/execute", post(handlers::workflows::execute))
        .route("/api/v1/workflows/submit", post(handlers::workflows::submit))
        .route("/api/v1/runs", get(handlers::runs::list))
        .route("/api/v1/runs/:id", get(handlers::runs::get))
        .route("/api/v1/runs/:id/trace", get(handlers::runs::trace))
        .route("/api/v1/runs/:id/cancel", post(handlers::runs::cancel))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve until the process exits.
pub async fn serve(bind: &str, state: AppState) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("API listening on {bind}");
    axum::serve(listener, router(state)).await
}
