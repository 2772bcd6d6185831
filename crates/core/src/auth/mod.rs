mod api_key;
mod traits;
mod trusted_header;
mod types;

pub use api_key::*;
pub use traits::*;
pub use trusted_header::TrustedHeaderAuthenticator;
pub use types::*;

use crate::config::AuthConfig;

/// Factory function to create authenticator from config
pub fn create_authenticator(config: &AuthConfig) -> Result<Box<dyn Authenticator>, AuthError> {
    use crate::config::AuthMethod;

    match config.method {
        AuthMethod::TrustedHeader => Ok(Box::new(TrustedHeaderAuthenticator::new(
            config.user_header.clone(),
        ))),
        AuthMethod::ApiKey => {
            let api_key = config.api_key.clone().ok_or_else(|| {
                AuthError::ConfigurationError(
                    "api_key must be set when using ApiKey auth method".to_string(),
                )
            })?;
            Ok(Box::new(ApiKeyAuthenticator::new(
                api_key,
                config.user_header.clone(),
            )))
        }
    }
}
