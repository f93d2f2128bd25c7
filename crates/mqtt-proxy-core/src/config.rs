//! Configuration types for the MQTT intercepting proxy.
//!
//! Configuration is loaded from YAML files and validated before use.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{ConfigError, ConfigResult};
use crate::network::codec::DEFAULT_MAX_PACKET_SIZE;
use crate::packet::MAX_REMAINING_LENGTH;

/// Root configuration for the proxy.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProxyConfig {
    /// Client-facing listener configuration.
    #[serde(default)]
    pub listen: ListenConfig,

    /// Upstream broker configuration.
    pub broker: BrokerConfig,

    /// Which sample handler to run and its settings.
    #[serde(default)]
    pub handler: HandlerConfig,

    /// Prometheus metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Client-facing listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListenConfig {
    /// Address to bind to, e.g., "0.0.0.0:1883".
    #[serde(default = "default_listen_address")]
    pub address: String,

    /// Maximum number of concurrent client connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// How long a client may take to complete the TLS handshake, in
    /// milliseconds.
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,

    /// Terminate TLS for clients when set.
    #[serde(default)]
    pub tls: Option<ListenerTlsConfig>,
}

/// TLS settings for the client-facing listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListenerTlsConfig {
    /// Server certificate chain (PEM).
    pub cert_path: PathBuf,

    /// Server private key (PEM).
    pub key_path: PathBuf,

    /// CA bundle for verifying client certificates (PEM).
    ///
    /// When set without `require_client_cert`, clients may connect with or
    /// without a certificate.
    pub ca_cert_path: Option<PathBuf>,

    /// Reject clients that present no valid certificate.
    #[serde(default)]
    pub require_client_cert: bool,
}

/// Upstream broker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BrokerConfig {
    /// Broker address as `host:port`.
    /// Supports environment variable expansion: "${MQTT_BROKER}"
    pub address: String,

    /// Connection timeout in milliseconds.
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,

    /// Largest packet body accepted in either direction.
    #[serde(default = "default_max_packet_size")]
    pub max_packet_size: usize,

    /// Connect to the broker over TLS when set.
    #[serde(default)]
    pub tls: Option<BrokerTlsConfig>,
}

impl ListenConfig {
    #[must_use]
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

impl BrokerConfig {
    /// Get the broker address with environment variables expanded.
    #[must_use]
    pub fn address(&self) -> String {
        expand_env_vars(&self.address)
    }

    #[must_use]
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }
}

/// TLS configuration for broker connections.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BrokerTlsConfig {
    /// Path to CA certificate file (PEM format) for verifying the broker.
    /// If not set, uses the bundled webpki roots.
    pub ca_cert_path: Option<PathBuf>,

    /// Path to client certificate file (PEM format) for mTLS authentication.
    pub cert_path: Option<PathBuf>,

    /// Path to client private key file (PEM format) for mTLS authentication.
    pub key_path: Option<PathBuf>,

    /// Name to verify the broker certificate against. Defaults to the host
    /// part of the broker address.
    pub server_name: Option<String>,
}

/// Sample handler selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerKind {
    /// Log every hook.
    #[default]
    Simple,
    /// Rewrite topics through a lookup table.
    Translator,
    /// Append text to every published payload.
    Injector,
    /// Tag every publish with a `Device` user property.
    UserInjector,
    /// Namespace topics by host name.
    HostTranslator,
}

impl HandlerKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Translator => "translator",
            Self::Injector => "injector",
            Self::UserInjector => "user_injector",
            Self::HostTranslator => "host_translator",
        }
    }
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HandlerKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.replace('-', "_").as_str() {
            "simple" => Ok(Self::Simple),
            "translator" => Ok(Self::Translator),
            "injector" => Ok(Self::Injector),
            "user_injector" => Ok(Self::UserInjector),
            "host_translator" => Ok(Self::HostTranslator),
            _ => Err(ConfigError::InvalidHandler {
                kind: s.to_string(),
                message: "unknown handler kind".to_string(),
            }),
        }
    }
}

/// Sample handler configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct HandlerConfig {
    #[serde(default)]
    pub kind: HandlerKind,

    /// Upstream topic rewrites for `translator`.
    #[serde(default)]
    pub topics: BTreeMap<String, String>,

    /// Downstream topic rewrites for `translator`.
    /// Defaults to the inverse of `topics`.
    #[serde(default)]
    pub reverse_topics: Option<BTreeMap<String, String>>,

    /// Text appended to payloads by `injector`.
    #[serde(default)]
    pub payload_suffix: String,
}

impl HandlerConfig {
    /// Downstream rewrite table, falling back to the inverse of `topics`.
    #[must_use]
    pub fn reverse_topics(&self) -> BTreeMap<String, String> {
        match &self.reverse_topics {
            Some(reverse) => reverse.clone(),
            None => self
                .topics
                .iter()
                .map(|(from, to)| (to.clone(), from.clone()))
                .collect(),
        }
    }

    /// Validate the handler configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if `translator` has no topics to translate.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.kind == HandlerKind::Translator && self.topics.is_empty() {
            return Err(ConfigError::InvalidHandler {
                kind: self.kind.to_string(),
                message: "at least one entry in 'topics' is required".to_string(),
            });
        }
        Ok(())
    }
}

/// Expand environment variables in a string.
///
/// Replaces `${VAR_NAME}` with the value of the environment variable `VAR_NAME`.
/// If the variable is not set, replaces with an empty string.
fn expand_env_vars(s: &str) -> String {
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid regex");
    re.replace_all(s, |caps: &regex::Captures| {
        std::env::var(&caps[1]).unwrap_or_default()
    })
    .to_string()
}

/// Split `host:port`, accepting bracketed IPv6 hosts.
pub(crate) fn split_host_port(addr: &str) -> ConfigResult<(String, u16)> {
    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| ConfigError::InvalidAddress(addr.to_string()))?;
    let port: u16 = port
        .parse()
        .map_err(|_| ConfigError::InvalidAddress(addr.to_string()))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(ConfigError::InvalidAddress(addr.to_string()));
    }
    Ok((host.to_string(), port))
}

/// Prometheus metrics configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsConfig {
    /// Whether to enable the metrics endpoint.
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,

    /// Address for the metrics HTTP server.
    #[serde(default = "default_metrics_address")]
    pub address: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output logs in JSON format (for production).
    #[serde(default)]
    pub json: bool,
}

// Default value functions

fn default_listen_address() -> String {
    "0.0.0.0:1883".to_string()
}

fn default_max_connections() -> usize {
    1000
}

fn default_connection_timeout_ms() -> u64 {
    10_000
}

fn default_handshake_timeout_ms() -> u64 {
    10_000
}

fn default_max_packet_size() -> usize {
    DEFAULT_MAX_PACKET_SIZE
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_address() -> String {
    "0.0.0.0:9090".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

// Default implementations

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            address: default_listen_address(),
            max_connections: default_max_connections(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            tls: None,
        }
    }
}

impl BrokerConfig {
    /// Broker at `address` with default settings.
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            connection_timeout_ms: default_connection_timeout_ms(),
            max_packet_size: default_max_packet_size(),
            tls: None,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            address: default_metrics_address(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// Configuration loading and validation

impl ProxyConfig {
    /// Configuration with defaults everywhere except the broker address.
    #[must_use]
    pub fn new(broker_address: impl Into<String>) -> Self {
        Self {
            listen: ListenConfig::default(),
            broker: BrokerConfig::new(broker_address),
            handler: HandlerConfig::default(),
            metrics: MetricsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Load configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if
    /// validation fails.
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError {
            path: path.display().to_string(),
            source: e,
        })?;

        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if parsing or validation fails.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> ConfigResult<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any validation check fails.
    pub fn validate(&self) -> ConfigResult<()> {
        split_host_port(&self.listen.address)?;
        if self.listen.max_connections == 0 {
            return Err(ConfigError::ZeroMaxConnections);
        }
        if let Some(tls) = &self.listen.tls {
            if tls.require_client_cert && tls.ca_cert_path.is_none() {
                return Err(ConfigError::MissingClientCa);
            }
        }

        split_host_port(&self.broker.address())?;
        let size = self.broker.max_packet_size;
        if !(2..=MAX_REMAINING_LENGTH).contains(&size) {
            return Err(ConfigError::InvalidMaxPacketSize {
                size,
                max: MAX_REMAINING_LENGTH,
            });
        }
        if let Some(tls) = &self.broker.tls {
            if tls.cert_path.is_some() != tls.key_path.is_some() {
                return Err(ConfigError::IncompleteClientIdentity);
            }
        }

        self.handler.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_config_passes_validation() {
        let config = ProxyConfig::new("localhost:1884");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_values_applied() {
        let yaml = r"
broker:
  address: 'broker.example.com:1883'
";
        let config = ProxyConfig::from_str(yaml).unwrap();
        assert_eq!(config.listen.address, "0.0.0.0:1883");
        assert_eq!(config.listen.max_connections, 1000);
        assert!(config.listen.tls.is_none());
        assert_eq!(config.listen.handshake_timeout(), Duration::from_secs(10));
        assert_eq!(config.broker.connection_timeout(), Duration::from_secs(10));
        assert_eq!(config.broker.max_packet_size, DEFAULT_MAX_PACKET_SIZE);
        assert_eq!(config.handler.kind, HandlerKind::Simple);
        assert!(config.metrics.enabled);
        assert_eq!(config.metrics.address, "0.0.0.0:9090");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_missing_broker_rejected() {
        assert!(matches!(
            ProxyConfig::from_str("listen:\n  address: '0.0.0.0:1883'\n"),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_invalid_listen_address() {
        let mut config = ProxyConfig::new("localhost:1884");
        config.listen.address = "no-port".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_zero_max_connections() {
        let mut config = ProxyConfig::new("localhost:1884");
        config.listen.max_connections = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroMaxConnections)
        ));
    }

    #[test]
    fn test_max_packet_size_bounds() {
        let mut config = ProxyConfig::new("localhost:1884");
        config.broker.max_packet_size = MAX_REMAINING_LENGTH + 1;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidMaxPacketSize { .. })
        ));
    }

    #[test]
    fn test_tls_config_parsing() {
        let yaml = r"
listen:
  address: '0.0.0.0:8883'
  tls:
    cert_path: '/etc/ssl/server.crt'
    key_path: '/etc/ssl/server.key'
    ca_cert_path: '/etc/ssl/ca.crt'
    require_client_cert: true
broker:
  address: 'broker.example.com:8883'
  tls:
    ca_cert_path: '/etc/ssl/broker-ca.crt'
    server_name: 'broker.internal'
";
        let config = ProxyConfig::from_str(yaml).unwrap();
        let listen_tls = config.listen.tls.unwrap();
        assert!(listen_tls.require_client_cert);
        assert_eq!(listen_tls.ca_cert_path, Some(PathBuf::from("/etc/ssl/ca.crt")));

        let broker_tls = config.broker.tls.unwrap();
        assert_eq!(broker_tls.server_name.as_deref(), Some("broker.internal"));
        assert!(broker_tls.cert_path.is_none());
    }

    #[test]
    fn test_mtls_without_ca_rejected() {
        let yaml = r"
listen:
  tls:
    cert_path: '/etc/ssl/server.crt'
    key_path: '/etc/ssl/server.key'
    require_client_cert: true
broker:
  address: 'localhost:1884'
";
        assert!(matches!(
            ProxyConfig::from_str(yaml),
            Err(ConfigError::MissingClientCa)
        ));
    }

    #[test]
    fn test_broker_identity_requires_key() {
        let mut config = ProxyConfig::new("localhost:1884");
        config.broker.tls = Some(BrokerTlsConfig {
            cert_path: Some(PathBuf::from("/etc/ssl/client.crt")),
            ..Default::default()
        });
        assert!(matches!(
            config.validate(),
            Err(ConfigError::IncompleteClientIdentity)
        ));
    }

    #[test]
    fn test_translator_config() {
        let yaml = r"
broker:
  address: 'localhost:1884'
handler:
  kind: translator
  topics:
    'test/topic': 'test/foo'
";
        let config = ProxyConfig::from_str(yaml).unwrap();
        assert_eq!(config.handler.kind, HandlerKind::Translator);
        assert_eq!(
            config.handler.reverse_topics().get("test/foo").map(String::as_str),
            Some("test/topic")
        );
    }

    #[test]
    fn test_translator_requires_topics() {
        let yaml = r"
broker:
  address: 'localhost:1884'
handler:
  kind: translator
";
        assert!(matches!(
            ProxyConfig::from_str(yaml),
            Err(ConfigError::InvalidHandler { .. })
        ));
    }

    #[test]
    fn test_handler_kind_from_str() {
        assert_eq!(
            "user-injector".parse::<HandlerKind>().unwrap(),
            HandlerKind::UserInjector
        );
        assert_eq!(
            "host_translator".parse::<HandlerKind>().unwrap(),
            HandlerKind::HostTranslator
        );
        assert!("bogus".parse::<HandlerKind>().is_err());
    }

    #[test]
    fn test_env_var_expansion() {
        std::env::set_var("TEST_MQTT_BROKER_HOST", "broker.internal");

        let config = BrokerConfig::new("${TEST_MQTT_BROKER_HOST}:1883");
        assert_eq!(config.address(), "broker.internal:1883");

        std::env::remove_var("TEST_MQTT_BROKER_HOST");
    }

    #[test]
    fn test_env_var_expansion_missing_var() {
        let config = BrokerConfig::new("${NONEXISTENT_MQTT_VAR}:1883");
        assert_eq!(config.address(), ":1883");

        let mut proxy = ProxyConfig::new("${NONEXISTENT_MQTT_VAR}:1883");
        proxy.broker = config;
        assert!(matches!(
            proxy.validate(),
            Err(ConfigError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_split_host_port() {
        assert_eq!(
            split_host_port("broker:1883").unwrap(),
            ("broker".to_string(), 1883)
        );
        assert_eq!(
            split_host_port("[::1]:8883").unwrap(),
            ("::1".to_string(), 8883)
        );
        assert!(split_host_port("broker").is_err());
        assert!(split_host_port("broker:99999").is_err());
    }

    #[test]
    fn test_example_config_parses() {
        let config = ProxyConfig::from_str(include_str!("../../../config.example.yaml")).unwrap();
        assert_eq!(config.handler.kind, HandlerKind::Translator);
        assert_eq!(config.handler.topics["test/topic"], "test/foo");
        assert_eq!(config.handler.reverse_topics()["test/foo"], "test/topic");
        assert!(config.listen.tls.is_none());
        assert!(config.handler.validate().is_ok());
    }
}
