//! Manuscript API handlers.

use axum::{
    body::Bytes,
    extract::{Multipart, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

use inkwell_core::{
    artifacts::{ArtifactKind, ArtifactSummary},
    ingest::{UploadReceipt, UploadRequest},
    manuscript::{Manuscript, ManuscriptPage},
    service::{DeletionReceipt, HumanEditReceipt, JobReceipt},
    AnalysisStatus,
};

use super::error::{ApiError, ApiResult};
use super::middleware::AuthUser;
use crate::state::AppState;

// ============================================================================
// Request Types
// ============================================================================

/// Query parameters for listing manuscripts
#[derive(Debug, Deserialize)]
pub struct ListParams {
    /// Opaque cursor from a previous page
    pub cursor: Option<String>,
    /// Page size (default 20, max 100)
    pub limit: Option<usize>,
}

/// Body of a regeneration request. An empty body regenerates every asset.
#[derive(Debug, Default, Deserialize)]
pub struct RegenerateRequest {
    pub kinds: Option<Vec<String>>,
}

// ============================================================================
// Handlers
// ============================================================================

/// Upload a manuscript (multipart: `file`, `title`, `genre`, `styleGuide`,
/// `declaredType`) and queue its analysis.
pub async fn upload(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<UploadReceipt>)> {
    let mut req = UploadRequest {
        user_id,
        ..Default::default()
    };
    let mut have_file = false;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("malformed multipart body: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                req.file_name = field.file_name().unwrap_or("manuscript").to_string();
                if req.declared_type.is_none() {
                    // Generic part types say nothing; fall back to the name and magic bytes.
                    req.declared_type = field
                        .content_type()
                        .filter(|ct| *ct != "application/octet-stream")
                        .map(str::to_string);
                }
                req.bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("failed to read file: {e}")))?
                    .to_vec();
                have_file = true;
            }
            "title" | "genre" | "styleGuide" | "declaredType" => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("failed to read {name}: {e}")))?;
                let value = Some(value.trim().to_string()).filter(|v| !v.is_empty());
                match name.as_str() {
                    "title" => req.title = value,
                    "genre" => req.genre = value,
                    "styleGuide" => req.style_guide = value,
                    _ => req.declared_type = value.or(req.declared_type.take()),
                }
            }
            _ => {}
        }
    }

    if !have_file {
        return Err(ApiError::bad_request("missing 'file' field"));
    }

    let receipt = state.service().upload(req).await?;
    Ok((StatusCode::ACCEPTED, Json(receipt)))
}

/// List the caller's manuscripts, newest first
pub async fn list(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<ManuscriptPage>> {
    let page = state
        .service()
        .list_manuscripts(&user_id, params.cursor.as_deref(), params.limit)
        .await?;
    Ok(Json(page))
}

pub async fn get(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Manuscript>> {
    Ok(Json(state.service().get_manuscript(&user_id, &id).await?))
}

pub async fn delete(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Json<DeletionReceipt>> {
    Ok(Json(state.service().delete_manuscript(&user_id, &id).await?))
}

pub async fn analysis_status(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Json<AnalysisStatus>> {
    Ok(Json(state.service().analysis_status(&user_id, &id).await?))
}

/// Start (or return the running) analysis job
pub async fn analyze(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
) -> ApiResult<(StatusCode, Json<JobReceipt>)> {
    let receipt = state.service().start_analysis(&user_id, &id).await?;
    let status = if receipt.existing {
        StatusCode::OK
    } else {
        StatusCode::ACCEPTED
    };
    Ok((status, Json(receipt)))
}

pub async fn regenerate(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<JobReceipt>)> {
    let request: RegenerateRequest = if body.iter().all(u8::is_ascii_whitespace) {
        RegenerateRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::bad_request(format!("invalid JSON body: {e}")))?
    };

    let kinds = request
        .kinds
        .map(|names| {
            names
                .iter()
                .map(|n| n.parse::<ArtifactKind>())
                .collect::<Result<Vec<_>, _>>()
        })
        .transpose()
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

    let receipt = state
        .service()
        .request_regeneration(&user_id, &id, kinds)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(receipt)))
}

pub async fn list_artifacts(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<ArtifactSummary>>> {
    Ok(Json(state.service().list_artifacts(&user_id, &id).await?))
}

/// Raw body of the latest version of one artifact
pub async fn fetch_artifact(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path((id, kind)): Path<(String, String)>,
) -> ApiResult<Response> {
    let body = state.service().fetch_artifact(&user_id, &id, &kind).await?;
    Ok((
        [
            (header::CONTENT_TYPE, body.content_type.clone()),
            (
                header::HeaderName::from_static("x-artifact-version"),
                body.version.to_string(),
            ),
        ],
        body.bytes.clone(),
    )
        .into_response())
}

/// Store an author revision of one chapter
pub async fn put_human_edit(
    State(state): State<Arc<AppState>>,
    AuthUser(user_id): AuthUser,
    Path((id, chapter)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<HumanEditReceipt>)> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("text/plain");
    let receipt = state
        .service()
        .put_human_edit(&user_id, &id, &chapter, content_type, body.to_vec())
        .await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}
