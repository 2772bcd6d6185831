use axum::{
    extract::DefaultBodyLimit,
    middleware as axum_middleware,
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::{
    admin, audit, handlers, jobs, manuscripts,
    middleware::{auth_middleware, metrics_middleware},
};
use crate::state::AppState;

/// Headroom on top of `pipeline.max_file_bytes` for multipart framing, so
/// moderately oversized files still reach the ingestor and get a typed error.
const BODY_LIMIT_HEADROOM: usize = 1024 * 1024;

pub fn create_router(state: Arc<AppState>) -> Router {
    let max_file_bytes = usize::try_from(state.config().pipeline.max_file_bytes).unwrap_or(usize::MAX);
    let body_limit = max_file_bytes
        .saturating_mul(2)
        .saturating_add(BODY_LIMIT_HEADROOM);

    // Unauthenticated: probes and scraping
    let public_routes = Router::new()
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics));

    let protected_routes = Router::new()
        .route("/config", get(handlers::get_config))
        // Manuscripts
        .route(
            "/manuscripts",
            post(manuscripts::upload).get(manuscripts::list),
        )
        .route(
            "/manuscripts/{id}",
            get(manuscripts::get).delete(manuscripts::delete),
        )
        .route("/manuscripts/{id}/status", get(manuscripts::analysis_status))
        .route("/manuscripts/{id}/analyze", post(manuscripts::analyze))
        .route("/manuscripts/{id}/regenerate", post(manuscripts::regenerate))
        .route("/manuscripts/{id}/artifacts", get(manuscripts::list_artifacts))
        .route(
            "/manuscripts/{id}/artifacts/{kind}",
            get(manuscripts::fetch_artifact),
        )
        .route(
            "/manuscripts/{id}/human-edits/{chapter}",
            put(manuscripts::put_human_edit),
        )
        // Jobs and quota
        .route("/jobs/{report_id}", get(jobs::get_job).delete(jobs::cancel_job))
        .route("/quota", get(jobs::get_quota))
        // Operator
        .route("/admin/dead-letters", get(admin::list_dead_letters))
        .route(
            "/admin/dead-letters/{id}/requeue",
            post(admin::requeue_dead_letter),
        )
        .route("/admin/workers", get(admin::workers_status))
        .route("/audit", get(audit::query_audit))
        .route("/audit/jobs/{report_id}", get(audit::job_trail))
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    let api_routes = public_routes.merge(protected_routes).with_state(state);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .nest("/api/v1", api_routes)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(axum_middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
