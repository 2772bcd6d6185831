//! Shared-key authentication for service-to-service callers.

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::traits::user_from_header;
use super::{AuthError, AuthRequest, Authenticator, Identity};

/// A trusted backend (the web app, a billing hook) presents the shared key
/// and names the author it acts for in the user header.
///
/// The key is read from `Authorization: Bearer <key>` or `X-API-Key`.
pub struct ApiKeyAuthenticator {
    key_digest: [u8; 32],
    user_header: String,
}

impl ApiKeyAuthenticator {
    pub fn new(api_key: String, user_header: impl Into<String>) -> Self {
        Self {
            key_digest: Sha256::digest(api_key.as_bytes()).into(),
            user_header: user_header.into().to_lowercase(),
        }
    }

    fn presented_key<'a>(&self, request: &'a AuthRequest) -> Option<&'a str> {
        let bearer = request.header("authorization").and_then(|value| {
            let (scheme, key) = value.split_once(' ')?;
            scheme.eq_ignore_ascii_case("bearer").then(|| key.trim())
        });
        bearer.or_else(|| request.header("x-api-key"))
    }

    /// Compares digests so the comparison time does not depend on the key.
    fn matches(&self, presented: &str) -> bool {
        let digest: [u8; 32] = Sha256::digest(presented.as_bytes()).into();
        digest
            .iter()
            .zip(self.key_digest.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

#[async_trait]
impl Authenticator for ApiKeyAuthenticator {
    async fn authenticate(&self, request: &AuthRequest) -> Result<Identity, AuthError> {
        let key = self
            .presented_key(request)
            .ok_or(AuthError::NotAuthenticated)?;
        if !self.matches(key) {
            return Err(AuthError::InvalidCredentials("Invalid API key".to_string()));
        }
        let user_id = user_from_header(request, &self.user_header)?;
        Ok(Identity::user(user_id, self.method_name()))
    }

    fn method_name(&self) -> &'static str {
        "api_key"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;

    const KEY: &str = "inkwell-backend-key";

    fn authenticator() -> ApiKeyAuthenticator {
        ApiKeyAuthenticator::new(KEY.to_string(), "X-User-Id")
    }

    fn request(headers: &[(&str, &str)]) -> AuthRequest {
        AuthRequest {
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_lowercase(), v.to_string()))
                .collect(),
            source_ip: "10.0.0.4".parse::<IpAddr>().unwrap(),
        }
    }

    #[tokio::test]
    async fn test_bearer_key_with_user() {
        let identity = authenticator()
            .authenticate(&request(&[
                ("Authorization", &format!("Bearer {KEY}")),
                ("X-User-Id", "author-7"),
            ]))
            .await
            .unwrap();
        assert_eq!(identity.user_id, "author-7");
        assert_eq!(identity.method, "api_key");
    }

    #[tokio::test]
    async fn test_x_api_key_and_lowercase_scheme() {
        let auth = authenticator();
        for headers in [
            [("X-API-Key", KEY.to_string()), ("x-user-id", "author-7".to_string())],
            [("authorization", format!("bearer {KEY}")), ("x-user-id", "author-7".to_string())],
        ] {
            let headers: Vec<(&str, &str)> = headers.iter().map(|(k, v)| (*k, v.as_str())).collect();
            let identity = auth.authenticate(&request(&headers)).await.unwrap();
            assert_eq!(identity.user_id, "author-7");
        }
    }

    #[tokio::test]
    async fn test_wrong_key_is_invalid() {
        let result = authenticator()
            .authenticate(&request(&[
                ("Authorization", "Bearer not-the-key"),
                ("X-User-Id", "author-7"),
            ]))
            .await;
        assert!(matches!(result, Err(AuthError::InvalidCredentials(_))));
    }

    #[tokio::test]
    async fn test_basic_scheme_is_not_a_key() {
        let result = authenticator()
            .authenticate(&request(&[("Authorization", &format!("Basic {KEY}"))]))
            .await;
        assert!(matches!(result, Err(AuthError::NotAuthenticated)));
    }

    #[tokio::test]
    async fn test_valid_key_still_needs_a_user() {
        let result = authenticator()
            .authenticate(&request(&[("X-API-Key", KEY)]))
            .await;
        assert!(matches!(result, Err(AuthError::NotAuthenticated)));
    }
}
