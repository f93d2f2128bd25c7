//! Upstream broker links.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::client::TlsStream;
use tracing::{debug, instrument, warn};

use crate::config::{split_host_port, BrokerConfig};
use crate::error::{ProxyError, Result};
use crate::tls::TlsConnector;

/// A broker connection, either plain TCP or TLS.
pub enum BrokerStream {
    /// Plain TCP connection.
    Plain(TcpStream),
    /// TLS connection; the proxy is the client.
    Tls(TlsStream<TcpStream>),
}

impl BrokerStream {
    /// Check if this is a TLS connection.
    pub fn is_tls(&self) -> bool {
        matches!(self, Self::Tls(_))
    }
}

impl AsyncRead for BrokerStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            BrokerStream::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            BrokerStream::Tls(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for BrokerStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            BrokerStream::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            BrokerStream::Tls(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            BrokerStream::Plain(stream) => Pin::new(stream).poll_flush(cx),
            BrokerStream::Tls(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            BrokerStream::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            BrokerStream::Tls(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

/// Dials the upstream broker, once per client session.
#[derive(Clone)]
pub struct BrokerConnector {
    address: String,
    host: String,
    connect_timeout: Duration,
    tls: Option<TlsConnector>,
}

impl BrokerConnector {
    /// Create a connector from the broker configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid or TLS cannot be set up.
    pub fn new(config: &BrokerConfig) -> Result<Self> {
        let address = config.address();
        let (host, _port) = split_host_port(&address)?;
        let tls = config.tls.as_ref().map(TlsConnector::new).transpose()?;

        Ok(Self {
            address,
            host,
            connect_timeout: config.connection_timeout(),
            tls,
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Open a new connection to the broker.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::BrokerUnavailable`] if the TCP connection fails,
    /// times out, or the TLS handshake fails.
    #[instrument(skip(self), fields(address = %self.address, tls = self.tls.is_some()))]
    pub async fn connect(&self) -> Result<BrokerStream> {
        let tcp_stream = match timeout(self.connect_timeout, TcpStream::connect(&self.address))
            .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                warn!(error = %e, "failed to connect to broker");
                return Err(self.unavailable(e.to_string()));
            }
            Err(_) => {
                warn!("connection timeout");
                return Err(self.unavailable("connection timeout"));
            }
        };

        if let Err(e) = tcp_stream.set_nodelay(true) {
            debug!(error = %e, "failed to set TCP_NODELAY");
        }

        debug!("TCP connection established");

        let Some(connector) = &self.tls else {
            return Ok(BrokerStream::Plain(tcp_stream));
        };

        let tls_stream = connector
            .connect(&self.host, tcp_stream)
            .await
            .map_err(|e| self.unavailable(e.to_string()))?;

        debug!("TLS handshake completed");
        Ok(BrokerStream::Tls(tls_stream))
    }

    fn unavailable(&self, message: impl Into<String>) -> ProxyError {
        ProxyError::BrokerUnavailable {
            address: self.address.clone(),
            message: message.into(),
        }
    }
}
