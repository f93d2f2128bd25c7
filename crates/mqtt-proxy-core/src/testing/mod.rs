//! Test utilities for the MQTT proxy.
//!
//! This module provides infrastructure for integration testing:
//!
//! - [`MockBroker`] - A lightweight mock MQTT broker
//! - [`ProxyTestHarness`] - A running proxy in front of a mock broker
//! - [`TestHarnessBuilder`] - Builder pattern for custom test configurations
//!
//! # Example
//!
//! ```rust,ignore
//! use mqtt_proxy_core::packet::{PacketType, ProtocolVersion};
//! use mqtt_proxy_core::testing::ProxyTestHarness;
//!
//! #[tokio::test]
//! async fn test_connect() {
//!     let harness = ProxyTestHarness::new().await;
//!     let _client = harness.connect(ProtocolVersion::V3_1_1, "c1").await;
//!
//!     let connects = harness.broker.received_of(PacketType::Connect).await;
//!     assert_eq!(connects.len(), 1);
//! }
//! ```

pub mod harness;
pub mod mock_broker;

pub use harness::{ProxyTestHarness, TestClient, TestHarnessBuilder};
pub use mock_broker::MockBroker;
