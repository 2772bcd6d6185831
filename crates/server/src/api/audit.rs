use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use inkwell_core::{
    audit::{AuditFilter, AuditRecord, DEFAULT_AUDIT_LIMIT},
    ServiceError,
};

use super::error::ApiResult;
use crate::state::AppState;

/// Maximum allowed limit for audit queries
const MAX_LIMIT: i64 = 1000;

/// Query parameters for audit endpoint
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditQueryParams {
    pub manuscript_id: Option<String>,
    pub report_id: Option<String>,
    /// Comma-separated event types, e.g. `stage_failed,job_dead_lettered`
    pub event_type: Option<String>,
    pub user_id: Option<String>,
    /// Events at or after this timestamp (ISO 8601)
    pub from: Option<DateTime<Utc>>,
    /// Events at or before this timestamp (ISO 8601)
    pub to: Option<DateTime<Utc>>,
    /// Maximum number of events to return (default 100, max 1000)
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct AuditQueryResponse {
    pub events: Vec<AuditRecord>,
    /// Matching events ignoring limit and offset
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

impl AuditQueryParams {
    fn filter(&self) -> AuditFilter {
        let mut filter = AuditFilter::new().between(self.from, self.to);
        if let Some(id) = &self.manuscript_id {
            filter = filter.manuscript(id);
        }
        if let Some(id) = &self.report_id {
            filter = filter.report(id);
        }
        if let Some(user_id) = &self.user_id {
            filter = filter.user(user_id);
        }
        let types = self.event_type.as_deref().unwrap_or_default();
        for event_type in types.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            filter = filter.of_type(event_type);
        }
        filter
    }
}

/// Query audit events
pub async fn query_audit(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AuditQueryParams>,
) -> ApiResult<Json<AuditQueryResponse>> {
    let limit = params.limit.unwrap_or(DEFAULT_AUDIT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = params.offset.unwrap_or(0).max(0);

    let base_filter = params.filter();
    let query_filter = AuditFilter {
        limit,
        offset,
        ..base_filter.clone()
    };

    let events = state
        .audit_store()
        .query(&query_filter)
        .map_err(|e| ServiceError::Internal(format!("failed to query audit events: {e}")))?;
    let total = state
        .audit_store()
        .count(&base_filter)
        .map_err(|e| ServiceError::Internal(format!("failed to count audit events: {e}")))?;

    Ok(Json(AuditQueryResponse {
        events,
        total,
        limit,
        offset,
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobTrailResponse {
    pub report_id: String,
    /// Oldest first
    pub events: Vec<AuditRecord>,
}

/// Everything recorded for one job, in order
pub async fn job_trail(
    State(state): State<Arc<AppState>>,
    Path(report_id): Path<String>,
) -> ApiResult<Json<JobTrailResponse>> {
    let events = state
        .audit_store()
        .job_trail(&report_id)
        .map_err(|e| ServiceError::Internal(format!("failed to load job trail: {e}")))?;
    Ok(Json(JobTrailResponse { report_id, events }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(event_type: Option<&str>) -> AuditQueryParams {
        AuditQueryParams {
            manuscript_id: Some("m1".to_string()),
            report_id: None,
            event_type: event_type.map(str::to_string),
            user_id: None,
            from: None,
            to: None,
            limit: None,
            offset: None,
        }
    }

    #[test]
    fn test_event_type_list_is_split() {
        let filter = params(Some("stage_failed, job_dead_lettered,")).filter();
        assert_eq!(filter.event_types, vec!["stage_failed", "job_dead_lettered"]);
        assert_eq!(filter.manuscript_id.as_deref(), Some("m1"));

        assert!(params(None).filter().event_types.is_empty());
    }
}
