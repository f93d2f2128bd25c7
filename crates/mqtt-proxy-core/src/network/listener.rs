//! TCP listener for accepting MQTT client connections.
//!
//! The listener accepts connections and spawns a task for each one. The
//! task terminates TLS if configured, dials the broker and relays the
//! session until either side goes away.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, warn, Instrument};

use super::broker::BrokerConnector;
use super::client_stream::ClientStream;
use super::codec::MqttCodec;
use crate::config::ProxyConfig;
use crate::error::{ProxyError, Result, TlsError};
use crate::metrics::ProxyMetrics;
use crate::session::{stream_with_codec, Handler, Interceptor};
use crate::tls::TlsServerAcceptor;

/// TCP listener that accepts client connections.
pub struct ProxyListener {
    config: Arc<ProxyConfig>,
    session: SessionFactory,
    shutdown: CancellationToken,
    sessions: TaskTracker,
    active_connections: Arc<AtomicUsize>,
}

/// Everything a connection task needs to run one session.
#[derive(Clone)]
struct SessionFactory {
    handler: Arc<dyn Handler>,
    interceptor: Option<Arc<dyn Interceptor>>,
    metrics: Option<Arc<ProxyMetrics>>,
    tls: Option<TlsServerAcceptor>,
    broker: BrokerConnector,
    max_packet_size: usize,
    handshake_timeout: Duration,
}

impl ProxyListener {
    /// Create a new proxy listener.
    ///
    /// # Errors
    ///
    /// Returns an error if the broker address is invalid or TLS material
    /// cannot be loaded.
    pub fn new(config: ProxyConfig, handler: Arc<dyn Handler>) -> Result<Self> {
        let tls = config
            .listen
            .tls
            .as_ref()
            .map(TlsServerAcceptor::new)
            .transpose()?;
        let broker = BrokerConnector::new(&config.broker)?;

        let session = SessionFactory {
            handler,
            interceptor: None,
            metrics: None,
            tls,
            broker,
            max_packet_size: config.broker.max_packet_size,
            handshake_timeout: config.listen.handshake_timeout(),
        };

        Ok(Self {
            config: Arc::new(config),
            session,
            shutdown: CancellationToken::new(),
            sessions: TaskTracker::new(),
            active_connections: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Run `interceptor` on every relayed packet.
    #[must_use]
    pub fn with_interceptor(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.session.interceptor = Some(interceptor);
        self
    }

    /// Record session metrics.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<ProxyMetrics>) -> Self {
        self.session.metrics = Some(metrics);
        self
    }

    /// Get a shutdown handle to signal the listener to stop.
    ///
    /// Cancelling it also ends every running session.
    #[must_use]
    pub fn shutdown_handle(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Get the current number of active connections.
    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Bind the configured address and serve until shutdown.
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the listen address fails.
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.config.listen.address).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener until shutdown.
    ///
    /// Returns once every session spawned by this listener has finished,
    /// including its disconnect hook.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener's local address cannot be read.
    #[instrument(skip_all, fields(broker = %self.session.broker.address()))]
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let address = listener.local_addr()?;
        info!(%address, "proxy listening");

        let session = Arc::new(self.session.clone());

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((socket, peer)) => self.accept(&session, socket, peer),
                        Err(e) => {
                            error!(error = %e, "accept error");
                        }
                    }
                }
                _ = self.shutdown.cancelled() => {
                    info!("shutdown signal received");
                    break;
                }
            }
        }

        self.sessions.close();
        let active = self.active_connections.load(Ordering::Relaxed);
        if active > 0 {
            info!(active, "waiting for sessions to close");
        }
        self.sessions.wait().await;
        debug!("all sessions closed");

        Ok(())
    }

    fn accept(&self, session: &Arc<SessionFactory>, socket: TcpStream, peer: SocketAddr) {
        let current = self.active_connections.load(Ordering::Relaxed);

        if current >= self.config.listen.max_connections {
            warn!(
                %peer,
                active = current,
                max = self.config.listen.max_connections,
                "connection rejected: limit reached"
            );
            // dropping the socket closes it
            return;
        }

        self.active_connections.fetch_add(1, Ordering::Relaxed);
        debug!(%peer, active = current + 1, "accepted connection");

        let session = Arc::clone(session);
        let shutdown = self.shutdown.clone();
        let active_connections = Arc::clone(&self.active_connections);

        self.sessions.spawn(
            async move {
                if let Some(metrics) = &session.metrics {
                    metrics.session_started();
                }

                let result = session.run(socket, &shutdown).await;
                session.report(result);

                if let Some(metrics) = &session.metrics {
                    metrics.session_ended();
                }
                active_connections.fetch_sub(1, Ordering::Relaxed);
            }
            .instrument(tracing::info_span!("session", %peer)),
        );
    }
}

impl SessionFactory {
    async fn run(&self, socket: TcpStream, shutdown: &CancellationToken) -> Result<()> {
        if let Err(e) = socket.set_nodelay(true) {
            debug!(error = %e, "failed to set TCP_NODELAY");
        }

        let client = match &self.tls {
            Some(acceptor) => {
                let handshake = timeout(self.handshake_timeout, acceptor.accept(socket));
                let tls = tokio::select! {
                    result = handshake => {
                        result.map_err(|_| TlsError::Handshake("timed out".to_string()))??
                    }
                    _ = shutdown.cancelled() => return Err(ProxyError::Shutdown),
                };
                ClientStream::tls(tls)
            }
            None => ClientStream::plain(socket),
        };
        let peer_certificate = client.peer_certificate()?;
        if let Some(cert) = &peer_certificate {
            debug!(subject = cert.subject(), "client certificate presented");
        }

        let broker = tokio::select! {
            broker = self.broker.connect() => broker?,
            _ = shutdown.cancelled() => return Err(ProxyError::Shutdown),
        };

        stream_with_codec(
            shutdown,
            client,
            broker,
            Arc::clone(&self.handler),
            self.interceptor.clone(),
            peer_certificate,
            MqttCodec::with_max_packet_size(self.max_packet_size),
        )
        .await
    }

    fn report(&self, result: Result<()>) {
        let Err(e) = result else {
            debug!("session closed");
            return;
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_session_error(e.kind());
        }

        match &e {
            ProxyError::Shutdown => debug!("session closed: shutdown"),
            ProxyError::Connection(io_err)
                if io_err.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                debug!("client disconnected");
            }
            _ if e.hook_error().is_some() => warn!(error = %e, "session rejected"),
            _ => error!(error = %e, "session error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ListenerTlsConfig;
    use crate::error::HookResult;
    use crate::session::{Context, NoopHandler};
    use crate::tls::test_fixtures::{pem_file, TEST_CERT, TEST_KEY};
    use async_trait::async_trait;
    use tempfile::NamedTempFile;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn bound() -> (TcpListener, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        (listener, addr)
    }

    fn test_config(broker: SocketAddr, max_connections: usize) -> ProxyConfig {
        let mut config = ProxyConfig::new(broker.to_string());
        config.listen.address = "127.0.0.1:0".to_string();
        config.listen.max_connections = max_connections;
        config
    }

    #[tokio::test]
    async fn test_listener_relays_to_broker() {
        let (broker, broker_addr) = bound().await;
        let (socket, proxy_addr) = bound().await;

        let listener =
            ProxyListener::new(test_config(broker_addr, 10), Arc::new(NoopHandler)).unwrap();
        let shutdown = listener.shutdown_handle();
        let task = tokio::spawn(async move { listener.serve(socket).await });

        let mut client = TcpStream::connect(proxy_addr).await.unwrap();
        let (mut upstream, _) = broker.accept().await.unwrap();

        // PINGREQ
        client.write_all(&[0xC0, 0x00]).await.unwrap();
        let mut buf = [0u8; 2];
        upstream.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [0xC0, 0x00]);

        shutdown.cancel();
        let result = timeout(Duration::from_secs(1), task).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_listener_shutdown() {
        let (_broker, broker_addr) = bound().await;
        let (socket, _) = bound().await;

        let listener =
            ProxyListener::new(test_config(broker_addr, 10), Arc::new(NoopHandler)).unwrap();
        let shutdown = listener.shutdown_handle();
        let task = tokio::spawn(async move { listener.serve(socket).await });

        shutdown.cancel();

        let result = timeout(Duration::from_secs(1), task).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_connection_limit() {
        let (broker, broker_addr) = bound().await;
        let (socket, proxy_addr) = bound().await;

        let listener = Arc::new(
            ProxyListener::new(test_config(broker_addr, 1), Arc::new(NoopHandler)).unwrap(),
        );
        let shutdown = listener.shutdown_handle();
        let serving = Arc::clone(&listener);
        let task = tokio::spawn(async move { serving.serve(socket).await });

        let _first = TcpStream::connect(proxy_addr).await.unwrap();
        let _upstream = broker.accept().await.unwrap();
        assert_eq!(listener.active_connections(), 1);

        let mut second = TcpStream::connect(proxy_addr).await.unwrap();
        let mut buf = [0u8; 1];
        let read = timeout(Duration::from_secs(1), second.read(&mut buf))
            .await
            .unwrap();
        // closed by the proxy without any data
        assert!(matches!(read, Ok(0) | Err(_)));

        shutdown.cancel();
        let _ = timeout(Duration::from_secs(1), task).await;
    }

    #[tokio::test]
    async fn test_unreachable_broker_closes_client() {
        let (broker, broker_addr) = bound().await;
        drop(broker);
        let (socket, proxy_addr) = bound().await;

        let metrics = Arc::new(ProxyMetrics::new());
        let listener = ProxyListener::new(test_config(broker_addr, 10), Arc::new(NoopHandler))
            .unwrap()
            .with_metrics(Arc::clone(&metrics));
        let shutdown = listener.shutdown_handle();
        let task = tokio::spawn(async move { listener.serve(socket).await });

        let mut client = TcpStream::connect(proxy_addr).await.unwrap();
        let mut buf = [0u8; 1];
        let read = timeout(Duration::from_secs(2), client.read(&mut buf))
            .await
            .unwrap();
        assert!(matches!(read, Ok(0) | Err(_)));

        // the session task records its outcome right before closing
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(metrics.sessions_total.get(), 1);
        assert_eq!(
            metrics
                .session_errors
                .with_label_values(&["broker_unavailable"])
                .get(),
            1
        );

        shutdown.cancel();
        let _ = timeout(Duration::from_secs(1), task).await;
    }

    /// Takes a while to say goodbye.
    struct SlowGoodbye {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Handler for SlowGoodbye {
        async fn disconnect(&self, _ctx: &Context) -> HookResult {
            tokio::time::sleep(Duration::from_millis(100)).await;
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_serve_waits_for_disconnect_hooks() {
        let (broker, broker_addr) = bound().await;
        let (socket, proxy_addr) = bound().await;

        let handler = Arc::new(SlowGoodbye {
            calls: AtomicUsize::new(0),
        });
        let listener = Arc::new(
            ProxyListener::new(test_config(broker_addr, 10), handler.clone()).unwrap(),
        );
        let shutdown = listener.shutdown_handle();
        let serving = Arc::clone(&listener);
        let task = tokio::spawn(async move { serving.serve(socket).await });

        let mut client = TcpStream::connect(proxy_addr).await.unwrap();
        let (mut upstream, _) = broker.accept().await.unwrap();
        client.write_all(&[0xC0, 0x00]).await.unwrap();
        let mut buf = [0u8; 2];
        upstream.read_exact(&mut buf).await.unwrap();

        shutdown.cancel();
        timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(listener.active_connections(), 0);
    }

    fn tls_config(
        broker: SocketAddr,
        handshake_timeout_ms: u64,
    ) -> (ProxyConfig, NamedTempFile, NamedTempFile) {
        let cert_file = pem_file(TEST_CERT);
        let key_file = pem_file(TEST_KEY);
        let mut config = test_config(broker, 10);
        config.listen.handshake_timeout_ms = handshake_timeout_ms;
        config.listen.tls = Some(ListenerTlsConfig {
            cert_path: cert_file.path().to_path_buf(),
            key_path: key_file.path().to_path_buf(),
            ca_cert_path: None,
            require_client_cert: false,
        });
        (config, cert_file, key_file)
    }

    #[tokio::test]
    async fn test_stalled_tls_handshake_times_out() {
        let (_broker, broker_addr) = bound().await;
        let (socket, proxy_addr) = bound().await;

        let (config, _cert, _key) = tls_config(broker_addr, 100);
        let metrics = Arc::new(ProxyMetrics::new());
        let listener = Arc::new(
            ProxyListener::new(config, Arc::new(NoopHandler))
                .unwrap()
                .with_metrics(Arc::clone(&metrics)),
        );
        let shutdown = listener.shutdown_handle();
        let serving = Arc::clone(&listener);
        let task = tokio::spawn(async move { serving.serve(socket).await });

        // connects but never sends a ClientHello
        let mut client = TcpStream::connect(proxy_addr).await.unwrap();
        let mut buf = [0u8; 1];
        let read = timeout(Duration::from_secs(2), client.read(&mut buf))
            .await
            .unwrap();
        assert!(matches!(read, Ok(0) | Err(_)));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(listener.active_connections(), 0);
        assert_eq!(metrics.session_errors.with_label_values(&["tls"]).get(), 1);

        shutdown.cancel();
        let _ = timeout(Duration::from_secs(1), task).await;
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_tls_handshake() {
        let (_broker, broker_addr) = bound().await;
        let (socket, proxy_addr) = bound().await;

        let (config, _cert, _key) = tls_config(broker_addr, 60_000);
        let listener = Arc::new(ProxyListener::new(config, Arc::new(NoopHandler)).unwrap());
        let shutdown = listener.shutdown_handle();
        let serving = Arc::clone(&listener);
        let task = tokio::spawn(async move { serving.serve(socket).await });

        let _client = TcpStream::connect(proxy_addr).await.unwrap();
        for _ in 0..50 {
            if listener.active_connections() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(listener.active_connections(), 1);

        shutdown.cancel();
        let result = timeout(Duration::from_secs(1), task).await;
        assert!(result.is_ok(), "serve kept waiting on a stalled handshake");
        assert_eq!(listener.active_connections(), 0);
    }
}
