use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;

/// What an authenticator gets to see of a request. Header names are
/// lowercased by the caller.
#[derive(Debug, Clone)]
pub struct AuthRequest {
    pub headers: HashMap<String, String>,
    pub source_ip: IpAddr,
}

impl AuthRequest {
    /// Trimmed value of `name` (any case).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(|v| v.trim())
    }
}

/// The author a request acts for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    /// Authenticator that produced this identity
    pub method: String,
    pub claims: HashMap<String, serde_json::Value>,
}

impl Identity {
    pub fn user(user_id: impl Into<String>, method: &str) -> Self {
        Self {
            user_id: user_id.into(),
            method: method.to_string(),
            claims: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_identity() {
        let identity = Identity::user("user-1", "trusted_header");
        assert_eq!(identity.user_id, "user-1");
        assert_eq!(identity.method, "trusted_header");
        assert!(identity.claims.is_empty());
    }

    #[test]
    fn test_header_lookup_ignores_case_and_padding() {
        let request = AuthRequest {
            headers: HashMap::from([("x-user-id".to_string(), "  author-9 ".to_string())]),
            source_ip: IpAddr::from([127, 0, 0, 1]),
        };
        assert_eq!(request.header("X-User-Id"), Some("author-9"));
        assert_eq!(request.header("x-api-key"), None);
    }
}
