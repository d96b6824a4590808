use serde::Deserialize;

use flock_api::EncodingPolicy;

use crate::error::EngineError;

/// Root configuration, parsed from TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct FlockConfig {
    /// Listen address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Listen port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Path serving the query endpoint.
    #[serde(default = "default_base_path")]
    pub base_path: String,

    /// Shared secret. Absent or empty disables authentication.
    #[serde(default)]
    pub auth_token: Option<String>,

    /// SQLite database path, or `:memory:`.
    #[serde(default = "default_database")]
    pub database: String,

    /// Render non-finite floats and unsupported types as `null`.
    #[serde(default)]
    pub coerce_invalid_to_null: bool,

    /// Capacity of the NDJSON line queue between the query worker and the socket.
    #[serde(default = "default_stream_buffer")]
    pub stream_buffer: usize,

    #[serde(default)]
    pub discovery: DiscoveryConfig,
}

fn default_host() -> String {
    "127.0.0.1".into()
}

fn default_port() -> u16 {
    9999
}

fn default_base_path() -> String {
    "/".into()
}

fn default_database() -> String {
    ":memory:".into()
}

fn default_stream_buffer() -> usize {
    256
}

/// Peer registry settings.
#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default = "default_discovery_enabled")]
    pub enabled: bool,

    /// Seconds between expiry sweeps.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

fn default_discovery_enabled() -> bool {
    true
}

fn default_sweep_interval() -> u64 {
    30
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: default_discovery_enabled(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl Default for FlockConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            base_path: default_base_path(),
            auth_token: None,
            database: default_database(),
            coerce_invalid_to_null: false,
            stream_buffer: default_stream_buffer(),
            discovery: DiscoveryConfig::default(),
        }
    }
}

impl FlockConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self, EngineError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| EngineError::Config(format!("{path}: {e}")))?;
        Self::parse(&content).map_err(|e| e.with_context(path))
    }

    /// Parse configuration from a TOML string.
    pub fn parse(toml_str: &str) -> Result<Self, EngineError> {
        let config: FlockConfig =
            toml::from_str(toml_str).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the server cannot run with.
    pub fn validate(&self) -> Result<(), EngineError> {
        if !self.base_path.starts_with('/') {
            return Err(EngineError::Config(format!(
                "base_path must start with '/', got '{}'",
                self.base_path
            )));
        }
        if matches!(self.base_path.as_str(), "/ping" | "/health")
            || self.base_path.starts_with("/discovery")
        {
            return Err(EngineError::Config(format!(
                "base_path '{}' collides with a built-in route",
                self.base_path
            )));
        }
        if self.stream_buffer == 0 {
            return Err(EngineError::Config("stream_buffer must be at least 1".into()));
        }
        if self.discovery.sweep_interval_secs == 0 {
            return Err(EngineError::Config(
                "discovery.sweep_interval_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Shared secret, with an empty token treated as no token.
    pub fn auth_token(&self) -> Option<&str> {
        self.auth_token.as_deref().filter(|t| !t.is_empty())
    }

    pub fn encoding_policy(&self) -> EncodingPolicy {
        EncodingPolicy {
            coerce_invalid_to_null: self.coerce_invalid_to_null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_gives_defaults() {
        let config = FlockConfig::parse("").unwrap();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 9999);
        assert_eq!(config.base_path, "/");
        assert_eq!(config.database, ":memory:");
        assert_eq!(config.stream_buffer, 256);
        assert!(config.discovery.enabled);
        assert_eq!(config.discovery.sweep_interval_secs, 30);
        assert!(config.auth_token().is_none());
    }

    #[test]
    fn parses_all_fields() {
        let config = FlockConfig::parse(
            r#"
            host = "0.0.0.0"
            port = 8123
            base_path = "/query"
            auth_token = "s3cr3t"
            database = "/tmp/flock.db"
            coerce_invalid_to_null = true

            [discovery]
            enabled = false
            sweep_interval_secs = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.port, 8123);
        assert_eq!(config.base_path, "/query");
        assert_eq!(config.auth_token(), Some("s3cr3t"));
        assert!(config.encoding_policy().coerce_invalid_to_null);
        assert!(!config.discovery.enabled);
        assert_eq!(config.discovery.sweep_interval_secs, 5);
    }

    #[test]
    fn empty_token_disables_auth() {
        let config = FlockConfig::parse(r#"auth_token = """#).unwrap();
        assert!(config.auth_token().is_none());
    }

    #[test]
    fn rejects_relative_base_path() {
        let err = FlockConfig::parse(r#"base_path = "query""#).unwrap_err();
        assert!(err.to_string().contains("base_path"));
    }

    #[test]
    fn rejects_builtin_routes_as_base_path() {
        assert!(FlockConfig::parse(r#"base_path = "/ping""#).is_err());
        assert!(FlockConfig::parse(r#"base_path = "/discovery/x""#).is_err());
    }

    #[test]
    fn validate_checks_values_built_in_code() {
        assert!(FlockConfig::default().validate().is_ok());

        let config = FlockConfig {
            base_path: "/health".into(),
            ..FlockConfig::default()
        };
        assert!(config.validate().is_err());

        let mut config = FlockConfig::default();
        config.discovery.sweep_interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_reports_path() {
        let err = FlockConfig::load("/nonexistent/flock.toml").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/flock.toml"));
    }
}
