//! Translation of service errors to HTTP responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;

use inkwell_core::ServiceError;

/// Error response body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error: String,
    /// Machine-readable error class.
    pub code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub used: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

/// Handler error; the only place service errors become status codes.
#[derive(Debug)]
pub struct ApiError(pub ServiceError);

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self(ServiceError::InvalidRequest(message.into()))
    }
}

impl From<ServiceError> for ApiError {
    fn from(e: ServiceError) -> Self {
        Self(e)
    }
}

pub fn status_for(error: &ServiceError) -> (StatusCode, &'static str) {
    match error {
        ServiceError::BadFile(_) => (StatusCode::BAD_REQUEST, "bad_file"),
        ServiceError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
        ServiceError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized"),
        ServiceError::QuotaExceeded { .. } => (StatusCode::FORBIDDEN, "quota_exceeded"),
        ServiceError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
        ServiceError::Conflict(_) => (StatusCode::CONFLICT, "conflict"),
        ServiceError::PreconditionMissing(_) => {
            (StatusCode::UNPROCESSABLE_ENTITY, "precondition_missing")
        }
        ServiceError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = status_for(&self.0);
        let message = match &self.0 {
            ServiceError::Internal(detail) => {
                error!(error = %detail, "Request failed");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        let mut body = ErrorResponse {
            error: message,
            code,
            plan_type: None,
            used: None,
            limit: None,
        };
        if let ServiceError::QuotaExceeded {
            plan_type,
            used,
            limit,
        } = self.0
        {
            body.plan_type = Some(plan_type);
            body.used = Some(used);
            body.limit = Some(limit);
        }
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (ServiceError::BadFile("empty".into()), StatusCode::BAD_REQUEST),
            (ServiceError::Unauthorized, StatusCode::UNAUTHORIZED),
            (
                ServiceError::QuotaExceeded {
                    plan_type: "free".into(),
                    used: 5,
                    limit: 5,
                },
                StatusCode::FORBIDDEN,
            ),
            (ServiceError::NotFound("m1".into()), StatusCode::NOT_FOUND),
            (ServiceError::Conflict("busy".into()), StatusCode::CONFLICT),
            (
                ServiceError::PreconditionMissing("developmental".into()),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (ServiceError::Internal("db".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (error, expected) in cases {
            assert_eq!(status_for(&error).0, expected, "{error:?}");
        }
    }

    #[test]
    fn test_internal_detail_is_not_exposed() {
        let response = ApiError(ServiceError::Internal("disk I/O error at /var/db".into())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
