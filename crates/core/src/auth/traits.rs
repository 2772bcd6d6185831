use async_trait::async_trait;
use thiserror::Error;

use super::types::{AuthRequest, Identity};

/// Longest accepted user id. Ids become object-key prefixes.
pub const MAX_USER_ID_LEN: usize = 128;

#[derive(Debug, Error)]
pub enum AuthError {
    /// No credentials or no user id on the request.
    #[error("Authentication required")]
    NotAuthenticated,

    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),
}

/// Resolves the owner of a request. Every manuscript, job and quota lookup
/// is scoped to the returned `Identity::user_id`.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, request: &AuthRequest) -> Result<Identity, AuthError>;

    /// Stable name, as used in config and logs
    fn method_name(&self) -> &'static str;
}

/// Trimmed user id from `header`. Ids that could escape their key prefix
/// are rejected.
pub(super) fn user_from_header(request: &AuthRequest, header: &str) -> Result<String, AuthError> {
    let value = request
        .header(header)
        .filter(|v| !v.is_empty())
        .ok_or(AuthError::NotAuthenticated)?;
    if value.len() > MAX_USER_ID_LEN || value.chars().any(|c| c.is_control() || c == '/') {
        return Err(AuthError::InvalidCredentials("Malformed user id".to_string()));
    }
    Ok(value.to_string())
}
