//! Operator endpoints: dead-letter inspection and replay, worker status.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

use inkwell_core::{
    orchestrator::OrchestratorStatus, queue::DeadLetter, queue::QueueName, service::JobReceipt,
};

use super::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct DeadLetterParams {
    /// `analysis` or `assets`; both when absent
    pub queue: Option<String>,
    pub limit: Option<usize>,
}

pub async fn list_dead_letters(
    State(state): State<Arc<AppState>>,
    Query(params): Query<DeadLetterParams>,
) -> ApiResult<Json<Vec<DeadLetter>>> {
    let queue = params
        .queue
        .as_deref()
        .map(|name| {
            QueueName::parse(name)
                .ok_or_else(|| ApiError::bad_request(format!("unknown queue: {name}")))
        })
        .transpose()?;

    let letters = state.service().list_dead_letters(queue, params.limit).await?;
    Ok(Json(letters))
}

/// Replay a parked message as a new job.
pub async fn requeue_dead_letter(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<(StatusCode, Json<JobReceipt>)> {
    let receipt = state.service().requeue_dead_letter(id).await?;
    info!(dead_letter_id = id, report_id = %receipt.report_id, "Requeued via API");
    Ok((StatusCode::ACCEPTED, Json(receipt)))
}

/// Worker pool state. Reports `running: false` when workers are disabled.
pub async fn workers_status(State(state): State<Arc<AppState>>) -> Json<OrchestratorStatus> {
    let status = state
        .workers()
        .map(|workers| workers.status())
        .unwrap_or_default();
    Json(status)
}
