//! MQTT Intercepting Proxy Core Library
//!
//! This library sits between MQTT clients and an MQTT broker. Every client
//! connection is paired with its own broker connection, and packets flowing
//! in both directions pass through pluggable hooks that can inspect,
//! rewrite or reject them.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration loading and validation
//! - [`error`] - Domain-specific error types
//! - [`packet`] - MQTT 3.1, 3.1.1 and 5.0 control packets
//! - [`network`] - Listener, client/broker links and the frame codec
//! - [`session`] - Per-connection relay engine and hook traits
//! - [`handlers`] - Sample hook implementations
//! - [`metrics`] - Prometheus metrics collection
//! - [`tls`] - TLS for both legs of the proxy
//!
//! # Example
//!
//! ```rust,ignore
//! use mqtt_proxy_core::config::ProxyConfig;
//! use mqtt_proxy_core::handlers::build_handler;
//! use mqtt_proxy_core::network::ProxyListener;
//!
//! let config = ProxyConfig::from_file("config.yaml")?;
//! let handler = build_handler(&config.handler)?;
//! let listener = ProxyListener::new(config, handler)?;
//! listener.run().await?;
//! ```

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod network;
pub mod packet;
pub mod session;
pub mod tls;

/// Test utilities for integration testing.
///
/// This module is only available when compiling tests or when the `testing` feature is enabled.
#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-export commonly used types
pub use config::{HandlerKind, ProxyConfig};
pub use error::{ConfigError, HookError, ProtocolError, ProxyError, Result, TlsError};
pub use network::{BrokerConnector, MqttCodec, ProxyListener};
pub use packet::Packet;
pub use session::{stream, Context, Direction, Handler, Interceptor, Session};
