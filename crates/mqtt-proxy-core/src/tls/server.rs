//! TLS acceptor for inbound MQTT client connections.

use std::sync::Arc;

use rustls::server::danger::ClientCertVerifier;
use rustls::server::WebPkiClientVerifier;
use rustls::ServerConfig;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor as TokioTlsAcceptor;
use tracing::debug;

use super::{ensure_crypto_provider, load_certificates, load_private_key, load_root_store};
use crate::config::ListenerTlsConfig;
use crate::error::{TlsError, TlsResult};
use crate::session::PeerCertificate;

/// TLS acceptor for inbound connections from MQTT clients.
///
/// Client certificates are not requested without a CA bundle, verified when
/// offered if a CA bundle is set, and demanded when `require_client_cert`
/// is set.
#[derive(Clone)]
pub struct TlsServerAcceptor {
    inner: TokioTlsAcceptor,
}

impl TlsServerAcceptor {
    /// Create a new TLS acceptor from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Server certificate or key files cannot be loaded
    /// - CA certificate for client verification cannot be loaded
    /// - TLS configuration is invalid
    pub fn new(config: &ListenerTlsConfig) -> TlsResult<Self> {
        ensure_crypto_provider();
        let server_config = build_server_config(config)?;
        Ok(Self {
            inner: TokioTlsAcceptor::from(Arc::new(server_config)),
        })
    }

    /// Run the server side of the handshake over `stream`.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS handshake fails.
    pub async fn accept<IO>(&self, stream: IO) -> TlsResult<TlsStream<IO>>
    where
        IO: AsyncRead + AsyncWrite + Unpin,
    {
        debug!("accepting TLS connection from client");

        self.inner
            .accept(stream)
            .await
            .map_err(|e| TlsError::Handshake(e.to_string()))
    }
}

/// The verified leaf certificate a client presented, if any.
///
/// # Errors
///
/// Returns an error if the certificate cannot be parsed as X.509.
pub fn peer_certificate<IO>(stream: &TlsStream<IO>) -> TlsResult<Option<PeerCertificate>> {
    let (_, connection) = stream.get_ref();
    match connection.peer_certificates() {
        Some(chain) => PeerCertificate::from_chain(chain),
        None => Ok(None),
    }
}

fn build_server_config(config: &ListenerTlsConfig) -> TlsResult<ServerConfig> {
    let certs = load_certificates(&config.cert_path)?;
    let key = load_private_key(&config.key_path)?;

    let builder = ServerConfig::builder();

    let builder = match (&config.ca_cert_path, config.require_client_cert) {
        (Some(ca_path), required) => {
            debug!(
                ca_path = %ca_path.display(),
                required,
                "configuring client certificate verification"
            );
            builder.with_client_cert_verifier(build_client_verifier(ca_path, required)?)
        }
        (None, true) => {
            return Err(TlsError::Config(
                "CA certificate path required when require_client_cert is true".to_string(),
            ));
        }
        (None, false) => {
            debug!("configuring TLS without client certificate verification");
            builder.with_no_client_auth()
        }
    };

    builder
        .with_single_cert(certs, key)
        .map_err(|e| TlsError::Config(format!("failed to configure server cert: {e}")))
}

fn build_client_verifier(
    ca_path: &std::path::Path,
    required: bool,
) -> TlsResult<Arc<dyn ClientCertVerifier>> {
    let root_store = load_root_store(ca_path)?;

    let builder = WebPkiClientVerifier::builder(Arc::new(root_store));
    let builder = if required {
        builder
    } else {
        builder.allow_unauthenticated()
    };

    builder
        .build()
        .map_err(|e| TlsError::Config(format!("failed to build client verifier: {e}")))
}
