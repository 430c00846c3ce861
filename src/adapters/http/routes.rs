//! Router for the export control surface. Authentication and TLS terminate
//! in front of this process; the router itself is the thin layer between
//! them and the engine.

use crate::adapters::http::handlers::{self, AppState};
use crate::ports::ExportControlPort;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub fn router(control: Arc<dyn ExportControlPort>) -> Router {
    let state = AppState { control };
    Router::new()
        .route("/api/export/create", post(handlers::create_job))
        .route("/api/export/tasks", get(handlers::list_jobs))
        .route(
            "/api/export/{id}",
            get(handlers::get_job).delete(handlers::delete),
        )
        .route(
            "/api/export/{id}/downloads",
            get(handlers::get_downloads),
        )
        .route("/api/export/{id}/start", post(handlers::start))
        .route("/api/export/{id}/pause", post(handlers::pause))
        .route("/api/export/{id}/resume", post(handlers::resume))
        .route("/api/export/{id}/cancel", post(handlers::cancel))
        .route("/api/export/{id}/retry", post(handlers::retry_failed))
        .route(
            "/api/export/{id}/retry_file/{item_id}",
            post(handlers::retry_file),
        )
        .route(
            "/api/export/{id}/download/{item_id}/pause",
            post(handlers::pause_item),
        )
        .route(
            "/api/export/{id}/download/{item_id}/resume",
            post(handlers::resume_item),
        )
        .route(
            "/api/export/{id}/download/{item_id}/cancel",
            post(handlers::cancel_item),
        )
        .route("/api/export/{id}/verify", post(handlers::verify))
        .route("/api/export/{id}/scan", post(handlers::scan))
        .route(
            "/api/export/{id}/concurrency",
            post(handlers::set_concurrency),
        )
        .route("/api/export/{id}/tdl-mode", post(handlers::set_tdl_mode))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
