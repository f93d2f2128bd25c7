//! Network layer of the proxy.
//!
//! - [`codec`]: MQTT frame codec
//! - [`client_stream`] and [`broker`]: plain or TLS links to each side
//! - [`listener`]: accepts clients and runs one session per connection

pub mod broker;
pub mod client_stream;
pub mod codec;
pub mod listener;

pub use broker::{BrokerConnector, BrokerStream};
pub use client_stream::ClientStream;
pub use codec::MqttCodec;
pub use listener::ProxyListener;
