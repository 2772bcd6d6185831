//! Authentication and metrics middleware for API routes.

use axum::{
    body::Body,
    extract::{ConnectInfo, FromRequestParts, State},
    http::{request::Parts, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use inkwell_core::{AuthError, AuthRequest, Identity, ServiceError};

use super::error::{ApiError, ErrorResponse};
use crate::metrics::{
    normalize_path, AUTH_FAILURES_TOTAL, HTTP_REQUESTS_IN_FLIGHT, HTTP_REQUESTS_TOTAL,
    HTTP_REQUEST_DURATION,
};
use crate::state::AppState;

/// Metrics middleware that tracks HTTP request duration and counts.
///
/// This middleware records:
/// - Request duration (histogram)
/// - Request count (counter)
/// - Requests in flight (gauge)
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let path = normalize_path(request.uri().path());

    HTTP_REQUESTS_IN_FLIGHT.inc();

    let response = next.run(request).await;

    HTTP_REQUESTS_IN_FLIGHT.dec();

    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    HTTP_REQUEST_DURATION
        .with_label_values(&[&method, &path, &status])
        .observe(duration);
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[&method, &path, &status])
        .inc();

    response
}

fn auth_failure(status: StatusCode, reason: &'static str, message: &str) -> Response {
    AUTH_FAILURES_TOTAL.with_label_values(&[reason]).inc();
    let body = ErrorResponse {
        error: message.to_string(),
        code: reason,
        plan_type: None,
        used: None,
        limit: None,
    };
    (status, Json(body)).into_response()
}

/// Authentication middleware that validates requests using the configured authenticator.
///
/// On success the resolved [`Identity`] is stored in the request extensions
/// for [`AuthUser`]. Missing or rejected credentials yield `401`.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let headers: HashMap<String, String> = request
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_lowercase(), v.to_string()))
        })
        .collect();

    // Absent for in-process callers; default to localhost
    let source_ip = request
        .extensions()
        .get::<ConnectInfo<std::net::SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST));

    let auth_request = AuthRequest { headers, source_ip };

    match state.authenticator().authenticate(&auth_request).await {
        Ok(identity) => {
            debug!(user_id = %identity.user_id, method = %identity.method, "Authenticated request");
            request.extensions_mut().insert(identity);
            next.run(request).await
        }
        Err(AuthError::NotAuthenticated) => auth_failure(
            StatusCode::UNAUTHORIZED,
            "not_authenticated",
            "Authentication required",
        ),
        Err(AuthError::InvalidCredentials(msg)) => {
            auth_failure(StatusCode::UNAUTHORIZED, "invalid_credentials", &msg)
        }
        Err(_) => auth_failure(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal_error",
            "Authentication unavailable",
        ),
    }
}

/// Extractor for the authenticated user id.
///
/// Rejects with `401` when no identity was attached, i.e. the route is not
/// behind [`auth_middleware`].
#[derive(Debug, Clone)]
pub struct AuthUser(pub String);

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> impl Future<Output = Result<Self, Self::Rejection>> + Send {
        let user = parts
            .extensions
            .get::<Identity>()
            .map(|id| AuthUser(id.user_id.clone()))
            .ok_or(ApiError(ServiceError::Unauthorized));
        std::future::ready(user)
    }
}
