//! Job status, cancellation and quota handlers.

use axum::{
    extract::{Path, State},
    Json,
};
use std::sync::Arc;

use inkwell_core::{status::JobStatus, usage::Quota};

use super::error::ApiResult;
use super::middleware::AuthUser;
use crate::state::AppState;

/// Progress of one job, as last reported by its worker.
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(report_id): Path<String>,
) -> ApiResult<Json<JobStatus>> {
    Ok(Json(state.service().get_status(&user_id, &report_id).await?))
}

/// Request cancellation. The worker stops at the next stage boundary.
pub async fn cancel_job(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(report_id): Path<String>,
) -> ApiResult<Json<JobStatus>> {
    Ok(Json(state.service().cancel_job(&user_id, &report_id).await?))
}

pub async fn get_quota(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
) -> ApiResult<Json<Quota>> {
    Ok(Json(state.service().get_quota(&user_id).await?))
}
