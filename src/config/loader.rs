//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use crate::config::schema::ProxyConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Load and validate configuration from a TOML file.
///
/// `${VAR}` occurrences in the raw text are substituted from the process
/// environment before parsing, so origin URLs and bind addresses can be
/// overridden per deployment.
pub fn load_config(path: &Path) -> Result<ProxyConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    let content = substitute_env(&content);
    let config: ProxyConfig = toml::from_str(&content).map_err(ConfigError::Parse)?;

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Replace `${VAR}` with the value of the environment variable `VAR`.
/// Unset variables leave the placeholder untouched.
fn substitute_env(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                match std::env::var(name) {
                    Ok(value) => out.push_str(&value),
                    Err(_) => {
                        out.push_str("${");
                        out.push_str(name);
                        out.push('}');
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_known_variables() {
        std::env::set_var("EDGEGATE_TEST_PORT", "9001");
        let raw = "url = \"http://127.0.0.1:${EDGEGATE_TEST_PORT}\"";
        assert_eq!(substitute_env(raw), "url = \"http://127.0.0.1:9001\"");
    }

    #[test]
    fn leaves_unknown_variables_in_place() {
        let raw = "url = \"${EDGEGATE_TEST_DOES_NOT_EXIST}\"";
        assert_eq!(substitute_env(raw), raw);
    }

    #[test]
    fn ignores_unterminated_placeholder() {
        let raw = "value = \"${OOPS";
        assert_eq!(substitute_env(raw), raw);
    }

    #[test]
    fn parses_minimal_config() {
        let raw = r#"
            [[origins]]
            id = "b1"
            url = "http://127.0.0.1:9001"

            [balancer]
            strategy = "round-robin"
        "#;
        let config: ProxyConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.origins.len(), 1);
        assert_eq!(config.breaker.failure_threshold, 50);
    }

    #[test]
    fn rejects_unknown_strategy() {
        let raw = r#"
            [balancer]
            strategy = "least-conn"
        "#;
        assert!(toml::from_str::<ProxyConfig>(raw).is_err());
    }
}
