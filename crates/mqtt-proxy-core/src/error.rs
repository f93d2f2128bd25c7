//! Domain error types for the MQTT intercepting proxy.
//!
//! Uses `thiserror` for ergonomic error definitions with proper context.

use thiserror::Error;

/// Errors related to configuration parsing and validation.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file '{path}': {source}")]
    IoError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse YAML configuration.
    #[error("failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    /// Invalid address format.
    #[error("invalid address format: {0} (expected 'host:port')")]
    InvalidAddress(String),

    /// `max_connections` must allow at least one client.
    #[error("max_connections must be at least 1")]
    ZeroMaxConnections,

    /// `max_packet_size` outside the range MQTT can express.
    #[error("max_packet_size must be between 2 and {max}, got {size}")]
    InvalidMaxPacketSize { size: usize, max: usize },

    /// Mutual TLS needs a CA bundle to verify client certificates against.
    #[error("require_client_cert is set but no ca_cert_path is configured")]
    MissingClientCa,

    /// Client certificate and key for the broker link must be given together.
    #[error("broker TLS cert_path and key_path must be set together")]
    IncompleteClientIdentity,

    /// The selected sample handler needs settings that are absent.
    #[error("handler '{kind}' is misconfigured: {message}")]
    InvalidHandler { kind: String, message: String },
}

/// Errors produced while decoding or encoding MQTT control packets.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Underlying stream failure surfaced through the codec.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Structurally invalid packet.
    #[error("malformed packet: {0}")]
    Malformed(String),

    /// Remaining length exceeds the configured limit.
    #[error("packet size {size} exceeds maximum {max}")]
    PacketTooLarge { size: usize, max: usize },

    /// CONNECT carried a protocol level other than 3, 4 or 5.
    #[error("unsupported protocol version: {0}")]
    UnsupportedProtocolVersion(u8),

    /// Fixed header names a reserved packet type.
    #[error("invalid packet type: {0}")]
    InvalidPacketType(u8),
}

impl ProtocolError {
    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed(message.into())
    }
}

/// Errors related to TLS setup and handshakes.
#[derive(Error, Debug)]
pub enum TlsError {
    /// Failed to read a certificate file.
    #[error("failed to load certificate from '{path}': {message}")]
    CertificateLoad { path: String, message: String },

    /// Failed to read a private key file.
    #[error("failed to load private key from '{path}': {message}")]
    PrivateKeyLoad { path: String, message: String },

    /// The PEM file held no usable certificate.
    #[error("no certificates found in '{0}'")]
    NoCertificates(String),

    /// The PEM file held no usable private key.
    #[error("no private keys found in '{0}'")]
    NoPrivateKeys(String),

    /// rustls rejected the assembled configuration.
    #[error("invalid TLS configuration: {0}")]
    Config(String),

    /// The server name is not a valid DNS name or IP address.
    #[error("invalid server name: {0}")]
    InvalidServerName(String),

    /// Handshake with the peer failed.
    #[error("TLS handshake failed: {0}")]
    Handshake(String),

    /// The peer presented a certificate that is not valid X.509.
    #[error("failed to parse peer certificate: {0}")]
    CertificateParse(String),
}

/// Errors returned by [`Handler`](crate::session::Handler) and
/// [`Interceptor`](crate::session::Interceptor) hooks.
///
/// Any hook error ends the session.
#[derive(Error, Debug)]
pub enum HookError {
    /// The hook could not find a session in its context.
    #[error("session is missing (action: {action})")]
    SessionMissing { action: &'static str },

    /// The hook refused the packet.
    #[error("rejected: {0}")]
    Rejected(String),

    /// I/O failure inside the hook.
    #[error("hook I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other failure raised by user hook code.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl HookError {
    /// Shorthand for [`HookError::Rejected`].
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected(reason.into())
    }
}

/// Errors that occur during proxy operation.
#[derive(Error, Debug)]
pub enum ProxyError {
    /// TCP/IO connection error.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// Packet could not be decoded or encoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// TLS setup or handshake failure.
    #[error("TLS error: {0}")]
    Tls(#[from] TlsError),

    /// Invalid configuration reached the runtime.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A handler or interceptor hook failed.
    #[error("hook error: {0}")]
    Hook(#[from] HookError),

    /// Failure in the client-to-broker direction.
    #[error("failed to proxy from MQTT client with id {client_id} to MQTT broker: {source}")]
    Upstream {
        client_id: String,
        #[source]
        source: Box<ProxyError>,
    },

    /// Failure in the broker-to-client direction.
    #[error("failed to proxy from MQTT broker to client with id {client_id}: {source}")]
    Downstream {
        client_id: String,
        #[source]
        source: Box<ProxyError>,
    },

    /// Several independent failures from one session.
    #[error("{}", join_messages(.0))]
    Joined(Vec<ProxyError>),

    /// A relay task panicked or was aborted.
    #[error("relay task failed: {0}")]
    TaskFailed(String),

    /// Broker is not reachable.
    #[error("broker {address} unavailable: {message}")]
    BrokerUnavailable { address: String, message: String },

    /// Shutdown signal received.
    #[error("proxy shutting down")]
    Shutdown,
}

fn join_messages(errors: &[ProxyError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

impl ProxyError {
    /// Combines any number of errors into one.
    ///
    /// Returns `None` when there is nothing to report, the error itself when
    /// there is exactly one, and [`ProxyError::Joined`] otherwise. Nested
    /// joins are flattened.
    pub fn join<I>(errors: I) -> Option<ProxyError>
    where
        I: IntoIterator<Item = ProxyError>,
    {
        let mut flat = Vec::new();
        for err in errors {
            match err {
                ProxyError::Joined(inner) => flat.extend(inner),
                other => flat.push(other),
            }
        }
        match flat.len() {
            0 => None,
            1 => flat.pop(),
            _ => Some(ProxyError::Joined(flat)),
        }
    }

    /// The individual errors this value stands for.
    pub fn errors(&self) -> Vec<&ProxyError> {
        match self {
            ProxyError::Joined(inner) => inner.iter().flat_map(ProxyError::errors).collect(),
            other => vec![other],
        }
    }

    /// The hook error at the root of this error, if any.
    pub fn hook_error(&self) -> Option<&HookError> {
        match self {
            ProxyError::Hook(err) => Some(err),
            ProxyError::Upstream { source, .. } | ProxyError::Downstream { source, .. } => {
                source.hook_error()
            }
            ProxyError::Joined(errors) => errors.iter().find_map(ProxyError::hook_error),
            _ => None,
        }
    }

    /// Short label for the root cause, used as a metric label.
    ///
    /// A joined error is labelled by its first member.
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::Connection(_) => "connection",
            ProxyError::Protocol(_) => "protocol",
            ProxyError::Tls(_) => "tls",
            ProxyError::Config(_) => "config",
            ProxyError::Hook(_) => "hook",
            ProxyError::Upstream { source, .. } | ProxyError::Downstream { source, .. } => {
                source.kind()
            }
            ProxyError::Joined(errors) => errors.first().map_or("multiple", ProxyError::kind),
            ProxyError::TaskFailed(_) => "task",
            ProxyError::BrokerUnavailable { .. } => "broker_unavailable",
            ProxyError::Shutdown => "shutdown",
        }
    }

    pub(crate) fn upstream(client_id: impl Into<String>, source: ProxyError) -> Self {
        ProxyError::Upstream {
            client_id: client_id.into(),
            source: Box::new(source),
        }
    }

    pub(crate) fn downstream(client_id: impl Into<String>, source: ProxyError) -> Self {
        ProxyError::Downstream {
            client_id: client_id.into(),
            source: Box::new(source),
        }
    }
}

/// Result type alias for proxy operations.
pub type Result<T> = std::result::Result<T, ProxyError>;

/// Result type alias for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for codec operations.
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;

/// Result type alias for TLS setup.
pub type TlsResult<T> = std::result::Result<T, TlsError>;

/// Result type alias for hook implementations.
pub type HookResult<T = ()> = std::result::Result<T, HookError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::InvalidMaxPacketSize {
            size: 1,
            max: 268_435_455,
        };
        assert!(err.to_string().contains("268435455"));
        assert!(err.to_string().contains("got 1"));
    }

    #[test]
    fn test_proxy_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "test");
        let proxy_err: ProxyError = io_err.into();
        assert!(matches!(proxy_err, ProxyError::Connection(_)));
    }

    #[test]
    fn test_upstream_message_names_client() {
        let err = ProxyError::upstream("c1", HookError::rejected("nope").into());
        assert_eq!(
            err.to_string(),
            "failed to proxy from MQTT client with id c1 to MQTT broker: hook error: rejected: nope"
        );
        assert!(matches!(err.hook_error(), Some(HookError::Rejected(_))));
    }

    #[test]
    fn test_downstream_message_names_client() {
        let err = ProxyError::downstream("c2", ProxyError::Shutdown);
        assert_eq!(
            err.to_string(),
            "failed to proxy from MQTT broker to client with id c2: proxy shutting down"
        );
    }

    #[test]
    fn test_join_empty_and_single() {
        assert!(ProxyError::join(Vec::new()).is_none());

        let single = ProxyError::join(vec![ProxyError::Shutdown]).unwrap();
        assert!(matches!(single, ProxyError::Shutdown));
    }

    #[test]
    fn test_join_flattens_nested() {
        let inner = ProxyError::join(vec![
            ProxyError::Shutdown,
            ProxyError::TaskFailed("boom".into()),
        ])
        .unwrap();
        let outer = ProxyError::join(vec![inner, HookError::rejected("x").into()]).unwrap();

        match &outer {
            ProxyError::Joined(errors) => assert_eq!(errors.len(), 3),
            other => panic!("expected joined error, got {other:?}"),
        }
        assert_eq!(outer.errors().len(), 3);
        assert!(outer.to_string().contains("boom"));
        assert!(outer.to_string().contains("rejected: x"));
    }

    #[test]
    fn test_kind_looks_through_direction() {
        let err = ProxyError::downstream("c1", HookError::rejected("no").into());
        assert_eq!(err.kind(), "hook");
        assert_eq!(
            ProxyError::join(vec![err, ProxyError::Shutdown]).unwrap().kind(),
            "hook"
        );
    }

    #[test]
    fn test_hook_error_found_inside_nested_join() {
        let write_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone");
        let joined = ProxyError::Joined(vec![
            ProxyError::downstream("c1", ProxyError::Connection(write_err)),
            ProxyError::downstream("c1", HookError::rejected("no").into()),
        ]);
        let err = ProxyError::join(vec![joined, ProxyError::Shutdown]).unwrap();

        assert!(matches!(err.hook_error(), Some(HookError::Rejected(_))));
        assert_eq!(err.kind(), "connection");
        assert_eq!(err.errors().len(), 3);
    }

    #[test]
    fn test_session_missing_names_action() {
        let err = HookError::SessionMissing { action: "AuthPublish" };
        assert!(err.to_string().contains("AuthPublish"));
    }
}
