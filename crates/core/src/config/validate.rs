use super::{types::Config, AuthMethod, ConfigError};

/// Validate configuration
/// Currently validates:
/// - Server port is not 0
/// - API key present for `api_key` auth
/// - Limits, attempts and deadlines are non-zero
/// - The per-call LLM deadline fits inside the stage deadline
/// - A queue lease outlives one stage batch
/// - The free plan exists
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(invalid("server.port cannot be 0"));
    }

    if config.auth.method == AuthMethod::ApiKey
        && config.auth.api_key.as_deref().map_or(true, str::is_empty)
    {
        return Err(invalid("auth.api_key must be set when method = \"api_key\""));
    }

    if config.auth.user_header.trim().is_empty() {
        return Err(invalid("auth.user_header cannot be empty"));
    }

    let pipeline = &config.pipeline;
    if pipeline.max_file_bytes == 0 {
        return Err(invalid("pipeline.max_file_bytes cannot be 0"));
    }
    if pipeline.max_pages == 0 {
        return Err(invalid("pipeline.max_pages cannot be 0"));
    }
    if pipeline.queue_max_attempts == 0 {
        return Err(invalid("pipeline.queue_max_attempts cannot be 0"));
    }
    if pipeline.stage_deadline_secs == 0 {
        return Err(invalid("pipeline.stage_deadline_secs cannot be 0"));
    }
    // Leases are renewed between batches; a batch runs its stages
    // concurrently, so one stage deadline is the longest gap.
    if pipeline.visibility_timeout_secs <= pipeline.stage_deadline_secs {
        return Err(invalid(
            "pipeline.visibility_timeout_secs must exceed pipeline.stage_deadline_secs",
        ));
    }
    if pipeline.worker_count == 0 {
        return Err(invalid("pipeline.worker_count cannot be 0"));
    }

    if config.llm.max_attempts == 0 {
        return Err(invalid("llm.max_attempts cannot be 0"));
    }
    if config.llm.deadline_secs == 0 {
        return Err(invalid("llm.deadline_secs cannot be 0"));
    }
    if config.llm.deadline_secs > pipeline.stage_deadline_secs {
        return Err(invalid(
            "llm.deadline_secs cannot exceed pipeline.stage_deadline_secs",
        ));
    }

    if !config.billing.plans.contains_key("free") {
        return Err(invalid("billing.plans must define a \"free\" plan"));
    }

    Ok(())
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::ValidationError(message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_config_from_str;

    fn base_config() -> Config {
        load_config_from_str(
            r#"
[auth]
method = "trusted_header"
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(validate_config(&base_config()).is_ok());
    }

    #[test]
    fn test_validate_port_zero_fails() {
        let mut config = base_config();
        config.server.port = 0;
        let err = validate_config(&config).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_validate_api_key_required() {
        let mut config = base_config();
        config.auth.method = AuthMethod::ApiKey;
        assert!(validate_config(&config).is_err());

        config.auth.api_key = Some("secret".to_string());
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_llm_deadline_within_stage_deadline() {
        let mut config = base_config();
        config.llm.deadline_secs = 900;
        config.pipeline.stage_deadline_secs = 600;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_lease_outlasts_a_stage() {
        let mut config = base_config();
        config.pipeline.stage_deadline_secs = 600;
        config.pipeline.visibility_timeout_secs = 600;
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("visibility_timeout_secs"));

        config.pipeline.visibility_timeout_secs = 601;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_zero_attempts_fails() {
        let mut config = base_config();
        config.pipeline.queue_max_attempts = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_free_plan_required() {
        let mut config = base_config();
        config.billing.plans.remove("free");
        assert!(validate_config(&config).is_err());
    }
}
