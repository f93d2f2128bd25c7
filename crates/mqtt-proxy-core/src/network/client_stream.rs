//! Plain or TLS link to an MQTT client.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::server::TlsStream;

use crate::error::TlsResult;
use crate::session::PeerCertificate;
use crate::tls::server::peer_certificate;

/// A client connection, either plain TCP or TLS terminated by the proxy.
///
/// Unlike [`BrokerStream`](super::BrokerStream), the TLS variant holds a
/// `server::TlsStream` because the proxy is the TLS server here.
pub enum ClientStream {
    /// Plain TCP connection.
    Plain(TcpStream),
    /// TLS connection; the proxy is the server.
    Tls(TlsStream<TcpStream>),
}

impl ClientStream {
    /// Create a new plain TCP stream.
    pub fn plain(stream: TcpStream) -> Self {
        Self::Plain(stream)
    }

    /// Create a new TLS stream (server-side).
    pub fn tls(stream: TlsStream<TcpStream>) -> Self {
        Self::Tls(stream)
    }

    /// Check if this is a TLS connection.
    pub fn is_tls(&self) -> bool {
        matches!(self, Self::Tls(_))
    }

    /// Get the peer address of the underlying TCP connection.
    pub fn peer_addr(&self) -> io::Result<std::net::SocketAddr> {
        match self {
            Self::Plain(stream) => stream.peer_addr(),
            Self::Tls(stream) => stream.get_ref().0.peer_addr(),
        }
    }

    /// The client certificate, for TLS connections where one was presented.
    ///
    /// # Errors
    ///
    /// Returns an error if the certificate is not valid X.509.
    pub fn peer_certificate(&self) -> TlsResult<Option<PeerCertificate>> {
        match self {
            Self::Plain(_) => Ok(None),
            Self::Tls(stream) => peer_certificate(stream),
        }
    }
}

impl AsyncRead for ClientStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ClientStream::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            ClientStream::Tls(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for ClientStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            ClientStream::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            ClientStream::Tls(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ClientStream::Plain(stream) => Pin::new(stream).poll_flush(cx),
            ClientStream::Tls(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ClientStream::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            ClientStream::Tls(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_plain_stream_has_no_certificate() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let connect = tokio::spawn(async move { TcpStream::connect(addr).await.unwrap() });
        let (socket, _) = listener.accept().await.unwrap();
        let _client = connect.await.unwrap();

        let stream = ClientStream::plain(socket);
        assert!(!stream.is_tls());
        assert!(stream.peer_addr().is_ok());
        assert!(stream.peer_certificate().unwrap().is_none());
    }
}
