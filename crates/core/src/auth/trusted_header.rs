use async_trait::async_trait;

use super::traits::user_from_header;
use super::{AuthError, AuthRequest, Authenticator, Identity};

/// Authenticator that trusts the user header set by the gateway in front of
/// the service. The gateway owns sessions; this only reads the result.
pub struct TrustedHeaderAuthenticator {
    header: String,
}

impl TrustedHeaderAuthenticator {
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into().to_lowercase(),
        }
    }
}

#[async_trait]
impl Authenticator for TrustedHeaderAuthenticator {
    async fn authenticate(&self, request: &AuthRequest) -> Result<Identity, AuthError> {
        let user_id = user_from_header(request, &self.header)?;
        Ok(Identity::user(user_id, self.method_name()))
    }

    fn method_name(&self) -> &'static str {
        "trusted_header"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::net::IpAddr;

    fn request(headers: &[(&str, &str)]) -> AuthRequest {
        AuthRequest {
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_lowercase(), v.to_string()))
                .collect::<HashMap<_, _>>(),
            source_ip: "127.0.0.1".parse::<IpAddr>().unwrap(),
        }
    }

    #[tokio::test]
    async fn test_reads_user_header() {
        let auth = TrustedHeaderAuthenticator::new("X-User-Id");
        let identity = auth
            .authenticate(&request(&[("x-user-id", " user-42 ")]))
            .await
            .unwrap();
        assert_eq!(identity.user_id, "user-42");
        assert_eq!(identity.method, "trusted_header");
    }

    #[tokio::test]
    async fn test_missing_or_blank_header() {
        let auth = TrustedHeaderAuthenticator::new("x-user-id");
        assert!(matches!(
            auth.authenticate(&request(&[])).await,
            Err(AuthError::NotAuthenticated)
        ));
        assert!(matches!(
            auth.authenticate(&request(&[("x-user-id", "  ")])).await,
            Err(AuthError::NotAuthenticated)
        ));
    }

    #[tokio::test]
    async fn test_user_id_with_slash_is_rejected() {
        let auth = TrustedHeaderAuthenticator::new("x-user-id");
        assert!(matches!(
            auth.authenticate(&request(&[("x-user-id", "../other")])).await,
            Err(AuthError::InvalidCredentials(_))
        ));
    }
}
