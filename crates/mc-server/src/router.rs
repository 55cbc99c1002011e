//! Axum router construction.

use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::context::AppContext;
use crate::routes;

/// Build the complete Axum router.
///
/// The request body limit follows `storage.max_upload_bytes` so uploads are
/// rejected by the extractor before being buffered in full.
pub fn build_router(ctx: AppContext) -> Router {
    let body_limit = usize::try_from(ctx.config.storage.max_upload_bytes).unwrap_or(usize::MAX);

    let api = Router::new()
        // Jobs
        .route(
            "/jobs",
            get(routes::jobs::list_jobs).post(routes::jobs::submit_job),
        )
        .route("/jobs/{id}", get(routes::jobs::get_job))
        .route("/jobs/{id}/convert", post(routes::jobs::convert_job))
        .route("/jobs/{id}/download", get(routes::jobs::download_job))
        // Reporting and administration
        .route("/stats", get(routes::admin::stats))
        .route("/admin/jobs/{id}", delete(routes::admin::delete_job))
        .route("/admin/cleanup", post(routes::admin::cleanup_now))
        .route("/events", get(routes::events::events_handler))
        // Peer node
        .route("/cleanup/{id}", delete(routes::peer::cleanup_job));

    Router::new()
        .route("/health", get(routes::health::health))
        .nest("/api", api)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}
