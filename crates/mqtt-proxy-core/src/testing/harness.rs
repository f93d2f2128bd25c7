//! Test harness for integration testing of the proxy.
//!
//! Provides a complete test environment with:
//! - Mock MQTT broker
//! - A running [`ProxyListener`] in front of it
//! - [`TestClient`] for speaking MQTT to the proxy

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use crate::config::ProxyConfig;
use crate::error::{ProtocolError, Result};
use crate::metrics::ProxyMetrics;
use crate::network::codec::MqttCodec;
use crate::network::ProxyListener;
use crate::packet::{Connect, Packet, PacketType, ProtocolVersion};
use crate::session::{Handler, Interceptor, NoopHandler};

use super::mock_broker::MockBroker;

/// How long [`TestClient::recv`] waits for a packet.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// Test harness for integration testing.
pub struct ProxyTestHarness {
    /// The mock broker behind the proxy.
    pub broker: MockBroker,
    /// Metrics recorded by the proxy.
    pub metrics: Arc<ProxyMetrics>,
    proxy_addr: SocketAddr,
    shutdown: CancellationToken,
    task: JoinHandle<Result<()>>,
}

impl ProxyTestHarness {
    /// Create a new test harness that relays without hooks.
    pub async fn new() -> Self {
        TestHarnessBuilder::new().build().await
    }

    /// Create a new test harness running `handler`.
    pub async fn with_handler(handler: Arc<dyn Handler>) -> Self {
        TestHarnessBuilder::new().handler(handler).build().await
    }

    /// Address clients connect to.
    #[must_use]
    pub fn proxy_address(&self) -> SocketAddr {
        self.proxy_addr
    }

    /// Open a raw client connection to the proxy.
    pub async fn client(&self) -> std::io::Result<TestClient> {
        let stream = TcpStream::connect(self.proxy_addr).await?;
        Ok(TestClient {
            framed: Framed::new(stream, MqttCodec::new()),
        })
    }

    /// Open a client connection and complete the CONNECT/CONNACK exchange.
    pub async fn connect(&self, version: ProtocolVersion, client_id: &str) -> TestClient {
        let mut client = self.client().await.expect("Failed to connect to proxy");
        client
            .send(Packet::Connect(Connect::new(version, client_id)))
            .await
            .expect("Failed to send CONNECT");
        let connack = client.recv().await.expect("No CONNACK received");
        assert_eq!(connack.packet_type(), PacketType::Connack);
        client
    }

    /// Stop the proxy and the mock broker.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(1), self.task).await;
        self.broker.stop();
    }
}

/// Builder for creating test harness with specific configuration.
pub struct TestHarnessBuilder {
    handler: Arc<dyn Handler>,
    interceptor: Option<Arc<dyn Interceptor>>,
    max_connections: usize,
    max_packet_size: Option<usize>,
}

impl TestHarnessBuilder {
    /// Create a new builder with default values.
    #[must_use]
    pub fn new() -> Self {
        Self {
            handler: Arc::new(NoopHandler),
            interceptor: None,
            max_connections: 100,
            max_packet_size: None,
        }
    }

    #[must_use]
    pub fn handler(mut self, handler: Arc<dyn Handler>) -> Self {
        self.handler = handler;
        self
    }

    #[must_use]
    pub fn interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptor = Some(interceptor);
        self
    }

    #[must_use]
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    #[must_use]
    pub fn max_packet_size(mut self, size: usize) -> Self {
        self.max_packet_size = Some(size);
        self
    }

    /// Build the test harness.
    pub async fn build(self) -> ProxyTestHarness {
        let mut broker = MockBroker::new("127.0.0.1:0");
        let broker_addr = broker.start().await.expect("Failed to start mock broker");

        let mut config = ProxyConfig::new(broker_addr);
        config.listen.address = "127.0.0.1:0".to_string();
        config.listen.max_connections = self.max_connections;
        if let Some(size) = self.max_packet_size {
            config.broker.max_packet_size = size;
        }
        config.validate().expect("Invalid test configuration");

        let metrics = Arc::new(ProxyMetrics::new());
        let mut listener = ProxyListener::new(config, self.handler)
            .expect("Failed to create proxy listener")
            .with_metrics(Arc::clone(&metrics));
        if let Some(interceptor) = self.interceptor {
            listener = listener.with_interceptor(interceptor);
        }

        let socket = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind proxy listener");
        let proxy_addr = socket.local_addr().expect("Failed to read proxy address");

        let shutdown = listener.shutdown_handle();
        let task = tokio::spawn(async move { listener.serve(socket).await });

        ProxyTestHarness {
            broker,
            metrics,
            proxy_addr,
            shutdown,
            task,
        }
    }
}

impl Default for TestHarnessBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// MQTT client connection for tests.
pub struct TestClient {
    framed: Framed<TcpStream, MqttCodec>,
}

impl TestClient {
    /// Send one packet.
    pub async fn send(&mut self, packet: Packet) -> std::result::Result<(), ProtocolError> {
        if let Packet::Connect(connect) = &packet {
            self.framed
                .codec()
                .set_protocol_version(connect.protocol_version);
        }
        self.framed.send(&packet).await
    }

    /// Next packet from the proxy, or `None` on close, error or timeout.
    pub async fn recv(&mut self) -> Option<Packet> {
        match tokio::time::timeout(RECV_TIMEOUT, self.framed.next()).await {
            Ok(Some(Ok(packet))) => Some(packet),
            _ => None,
        }
    }

    /// Whether the proxy has closed the connection.
    pub async fn is_closed(&mut self) -> bool {
        matches!(
            tokio::time::timeout(RECV_TIMEOUT, self.framed.next()).await,
            Ok(None | Some(Err(_)))
        )
    }

    /// Protocol level negotiated by the CONNECT this client sent.
    pub fn protocol_version(&self) -> ProtocolVersion {
        self.framed.codec().protocol_version()
    }
}
