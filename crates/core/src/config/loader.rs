use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use std::path::Path;

use super::{types::Config, ConfigError};

/// Environment prefix for overrides. Nested keys use a double underscore,
/// e.g. `INKWELL_LLM__CLAUDE_API_KEY`.
pub const ENV_PREFIX: &str = "INKWELL_";

/// Load configuration from file with environment variable overrides
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.display().to_string()));
    }

    let config: Config = Figment::new()
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()
        .map_err(|e| ConfigError::ParseError(e.to_string()))?;

    Ok(config)
}

/// Load configuration from TOML string (useful for testing)
pub fn load_config_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    toml::from_str(toml_str).map_err(|e| ConfigError::ParseError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_config_from_str_valid() {
        let toml = r#"
[auth]
method = "trusted_header"

[server]
port = 9000

[pipeline]
worker_count = 4
"#;
        let config = load_config_from_str(toml).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.pipeline.worker_count, 4);
    }

    #[test]
    fn test_load_config_from_str_missing_auth() {
        let toml = r#"
[server]
port = 8080
"#;
        let err = load_config_from_str(toml).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn test_load_config_file_not_found() {
        let err = load_config(Path::new("/nonexistent/inkwell.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound(_)));
    }

    #[test]
    fn test_load_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(
            temp_file,
            r#"
[auth]
method = "api_key"
api_key = "k"

[server]
host = "127.0.0.1"
port = 3000

[storage]
root = "/tmp/inkwell-objects"
"#
        )
        .unwrap();

        let config = load_config(temp_file.path()).unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.host.to_string(), "127.0.0.1");
        assert_eq!(
            config.storage.root,
            std::path::PathBuf::from("/tmp/inkwell-objects")
        );
    }

    #[test]
    fn test_env_overrides_nested_keys() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "inkwell.toml",
                r#"
[auth]
method = "trusted_header"

[pipeline]
worker_count = 2
"#,
            )?;
            jail.set_env("INKWELL_PIPELINE__WORKER_COUNT", "7");
            jail.set_env("INKWELL_LLM__CLAUDE_API_KEY", "sk-test");

            let config = load_config(Path::new("inkwell.toml")).unwrap();
            assert_eq!(config.pipeline.worker_count, 7);
            assert_eq!(config.llm.claude_api_key.as_deref(), Some("sk-test"));
            Ok(())
        });
    }
}
