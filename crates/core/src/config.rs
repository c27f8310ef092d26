use serde::Deserialize;
use url::Url;

use crate::error::{ForwarderError, ForwarderResult};

/// Root application configuration. Loaded from an optional TOML file and
/// environment variables with the prefix `AMPLITUDE_FORWARDER__`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub amplitude: AmplitudeConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

/// Vendor credentials and request options.
#[derive(Debug, Clone, Deserialize)]
pub struct AmplitudeConfig {
    /// Project API key. Required; validated at startup.
    #[serde(default)]
    pub api_key: String,
    /// Forwarded as `options.min_id_length` when set.
    #[serde(default)]
    pub min_id_length: Option<u32>,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_eu_endpoint")]
    pub eu_endpoint: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

/// Where visitor identity state lives.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Redis,
}

/// What a visitor without an explicit user identifier receives.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AnonymousUserPolicy {
    /// `user_id` stays absent; the device id identifies the visitor.
    #[default]
    Unset,
    /// A random identifier is generated once and persisted indefinitely.
    Generate,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdentityConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// Idle time after which the session scope ends.
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
    #[serde(default)]
    pub anonymous_user: AnonymousUserPolicy,
    #[serde(default = "default_maintenance_interval_secs")]
    pub maintenance_interval_secs: u64,
}

// Default functions
fn default_node_id() -> String {
    "forwarder-01".to_string()
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_http_port() -> u16 {
    8080
}
fn default_metrics_enabled() -> bool {
    true
}
fn default_metrics_port() -> u16 {
    9091
}
fn default_endpoint() -> String {
    "https://api2.amplitude.com/2/httpapi".to_string()
}
fn default_eu_endpoint() -> String {
    "https://api.eu.amplitude.com/2/httpapi".to_string()
}
fn default_request_timeout_ms() -> u64 {
    10_000
}
fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}
fn default_key_prefix() -> String {
    "amplitude".to_string()
}
fn default_session_ttl_secs() -> u64 {
    1800
}
fn default_maintenance_interval_secs() -> u64 {
    60
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            port: default_metrics_port(),
        }
    }
}

impl Default for AmplitudeConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            min_id_length: None,
            endpoint: default_endpoint(),
            eu_endpoint: default_eu_endpoint(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            redis_url: default_redis_url(),
            key_prefix: default_key_prefix(),
            session_ttl_secs: default_session_ttl_secs(),
            anonymous_user: AnonymousUserPolicy::default(),
            maintenance_interval_secs: default_maintenance_interval_secs(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            api: ApiConfig::default(),
            metrics: MetricsConfig::default(),
            amplitude: AmplitudeConfig::default(),
            identity: IdentityConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from an optional config file, then environment
    /// variables (which take precedence).
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("AMPLITUDE_FORWARDER")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Reject configurations the forwarder cannot run with.
    pub fn validate(&self) -> ForwarderResult<()> {
        if self.amplitude.api_key.trim().is_empty() {
            return Err(ForwarderError::Config(
                "amplitude.api_key must not be empty".to_string(),
            ));
        }
        validate_endpoint("amplitude.endpoint", &self.amplitude.endpoint)?;
        validate_endpoint("amplitude.eu_endpoint", &self.amplitude.eu_endpoint)?;
        if self.identity.session_ttl_secs == 0 {
            return Err(ForwarderError::Config(
                "identity.session_ttl_secs must be positive".to_string(),
            ));
        }
        if self.identity.backend == StoreBackend::Redis && self.identity.redis_url.is_empty() {
            return Err(ForwarderError::Config(
                "identity.redis_url is required for the redis backend".to_string(),
            ));
        }
        Ok(())
    }
}

fn validate_endpoint(field: &str, value: &str) -> ForwarderResult<()> {
    let parsed = Url::parse(value)
        .map_err(|e| ForwarderError::Config(format!("{field} is not a valid URL: {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ForwarderError::Config(format!(
            "{field} must use http or https, got '{other}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.amplitude.api_key = "test-key".into();
        config
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.api.http_port, 8080);
        assert_eq!(config.amplitude.endpoint, "https://api2.amplitude.com/2/httpapi");
        assert_eq!(
            config.amplitude.eu_endpoint,
            "https://api.eu.amplitude.com/2/httpapi"
        );
        assert!(config.amplitude.min_id_length.is_none());
        assert_eq!(config.identity.backend, StoreBackend::Memory);
        assert_eq!(config.identity.anonymous_user, AnonymousUserPolicy::Unset);
        assert_eq!(config.identity.session_ttl_secs, 1800);
    }

    #[test]
    fn test_validate_requires_api_key() {
        assert!(AppConfig::default().validate().is_err());
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_validate_endpoint_scheme() {
        let mut config = valid_config();
        config.amplitude.eu_endpoint = "ftp://api.eu.amplitude.com".into();
        assert!(config.validate().is_err());

        config.amplitude.eu_endpoint = "not a url".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_session_ttl() {
        let mut config = valid_config();
        config.identity.session_ttl_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deserialize_sections() {
        let config: AppConfig = serde_json::from_value(serde_json::json!({
            "amplitude": {"api_key": "abc", "min_id_length": 3},
            "identity": {"backend": "redis", "anonymous_user": "generate"}
        }))
        .unwrap();
        assert_eq!(config.amplitude.api_key, "abc");
        assert_eq!(config.amplitude.min_id_length, Some(3));
        assert_eq!(config.identity.backend, StoreBackend::Redis);
        assert_eq!(config.identity.anonymous_user, AnonymousUserPolicy::Generate);
        assert_eq!(config.api.host, "0.0.0.0");
    }
}
