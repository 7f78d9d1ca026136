//! Configuration loading from the environment.

use std::str::FromStr;

use crate::config::schema::{ConnectMode, RelayConfig};

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    /// A required variable is absent.
    Missing(&'static str),
    /// A variable is present but unparseable.
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
    /// The assembled configuration is semantically wrong.
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Missing(var) => write!(f, "{} must be set", var),
            ConfigError::Invalid { var, value, reason } => {
                write!(f, "{}={} is invalid: {}", var, value, reason)
            }
            ConfigError::Validation(msg) => write!(f, "invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl RelayConfig {
    /// Load and validate configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load from an arbitrary variable source. `from_env` is the production
    /// entry point; tests supply closures instead of mutating the process
    /// environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = RelayConfig::default();

        config.manager.token = lookup("MANAGER_TOKEN").ok_or(ConfigError::Missing("MANAGER_TOKEN"))?;
        if let Some(port) = parse_var(&lookup, "PORT")? {
            config.listener.port = port;
        }
        if let Some(max) = parse_var(&lookup, "MAX_CONNECTIONS")? {
            config.listener.max_connections = max;
        }
        if let Some(timeout) = parse_var(&lookup, "DECISION_TIMEOUT_MS")? {
            config.manager.decision_timeout_ms = timeout;
        }
        if let Some(keepalive) = parse_var(&lookup, "KEEPALIVE_SECS")? {
            config.manager.keepalive_secs = keepalive;
        }
        if let Some(path) = lookup("MANAGER_PATH") {
            config.manager.path = path;
        }
        if let Some(max_body) = parse_var(&lookup, "MAX_BODY_BYTES")? {
            config.limits.max_body_bytes = max_body;
        }
        if let Some(mode) = lookup("CONNECT_MODE") {
            config.connect_mode =
                ConnectMode::from_str(&mode).map_err(|reason| ConfigError::Invalid {
                    var: "CONNECT_MODE",
                    value: mode,
                    reason,
                })?;
        }
        config.observability.metrics_address = lookup("METRICS_ADDRESS");

        validate(&config)?;
        Ok(config)
    }
}

fn parse_var<F, T>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|err: T::Err| ConfigError::Invalid {
                var,
                value,
                reason: err.to_string(),
            }),
    }
}

/// Semantic checks beyond per-variable parsing.
fn validate(config: &RelayConfig) -> Result<(), ConfigError> {
    if config.manager.token.is_empty() {
        return Err(ConfigError::Validation(
            "MANAGER_TOKEN must not be empty".into(),
        ));
    }
    if config.manager.decision_timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "DECISION_TIMEOUT_MS must be greater than zero".into(),
        ));
    }
    if config.manager.keepalive_secs == 0 {
        return Err(ConfigError::Validation(
            "KEEPALIVE_SECS must be greater than zero".into(),
        ));
    }
    if !config.manager.path.starts_with('/') {
        return Err(ConfigError::Validation(
            "MANAGER_PATH must start with '/'".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn minimal_environment_uses_defaults() {
        let config =
            RelayConfig::from_lookup(lookup_from(&[("MANAGER_TOKEN", "secret")])).unwrap();
        assert_eq!(config.listener.port, 3000);
        assert_eq!(config.manager.decision_timeout_ms, 8_000);
        assert_eq!(config.connect_mode, ConnectMode::Relayed);
        assert_eq!(config.manager.path, "/manager");
    }

    #[test]
    fn missing_token_is_fatal() {
        let err = RelayConfig::from_lookup(lookup_from(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("MANAGER_TOKEN")));
    }

    #[test]
    fn overrides_are_applied() {
        let config = RelayConfig::from_lookup(lookup_from(&[
            ("MANAGER_TOKEN", "secret"),
            ("PORT", "10000"),
            ("DECISION_TIMEOUT_MS", "500"),
            ("CONNECT_MODE", "direct"),
            ("MAX_BODY_BYTES", "1024"),
        ]))
        .unwrap();
        assert_eq!(config.listener.port, 10_000);
        assert_eq!(config.manager.decision_timeout_ms, 500);
        assert_eq!(config.connect_mode, ConnectMode::Direct);
        assert_eq!(config.limits.max_body_bytes, 1024);
    }

    #[test]
    fn bad_values_are_rejected() {
        let err = RelayConfig::from_lookup(lookup_from(&[
            ("MANAGER_TOKEN", "secret"),
            ("PORT", "not-a-port"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "PORT", .. }));

        let err = RelayConfig::from_lookup(lookup_from(&[
            ("MANAGER_TOKEN", "secret"),
            ("CONNECT_MODE", "sideways"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { var: "CONNECT_MODE", .. }));
    }

    #[test]
    fn zero_timeout_fails_validation() {
        let err = RelayConfig::from_lookup(lookup_from(&[
            ("MANAGER_TOKEN", "secret"),
            ("DECISION_TIMEOUT_MS", "0"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }
}
