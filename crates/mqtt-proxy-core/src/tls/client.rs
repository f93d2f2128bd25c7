//! TLS client connector for the upstream broker link.

use std::sync::Arc;

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector as TokioTlsConnector;
use tracing::debug;

use super::{ensure_crypto_provider, load_certificates, load_private_key, load_root_store};
use crate::config::BrokerTlsConfig;
use crate::error::{TlsError, TlsResult};

/// TLS connector for outbound connections to the MQTT broker.
#[derive(Clone)]
pub struct TlsConnector {
    inner: TokioTlsConnector,
    server_name: Option<String>,
}

impl TlsConnector {
    /// Create a new TLS connector from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Certificate files cannot be loaded
    /// - Private key files cannot be loaded
    /// - TLS configuration is invalid
    pub fn new(config: &BrokerTlsConfig) -> TlsResult<Self> {
        ensure_crypto_provider();
        let client_config = build_client_config(config)?;
        Ok(Self {
            inner: TokioTlsConnector::from(Arc::new(client_config)),
            server_name: config.server_name.clone(),
        })
    }

    /// Create a TLS connector trusting the bundled webpki roots.
    ///
    /// # Errors
    ///
    /// Returns an error if the TLS configuration cannot be built.
    pub fn with_webpki_roots() -> TlsResult<Self> {
        Self::new(&BrokerTlsConfig::default())
    }

    /// Name the broker certificate is verified against: the configured
    /// override, else `host`.
    pub fn server_name<'a>(&'a self, host: &'a str) -> &'a str {
        self.server_name.as_deref().unwrap_or(host)
    }

    /// Run the client side of the handshake over `stream`.
    ///
    /// # Errors
    ///
    /// Returns an error if the server name is invalid or the handshake fails.
    pub async fn connect<IO>(&self, host: &str, stream: IO) -> TlsResult<TlsStream<IO>>
    where
        IO: AsyncRead + AsyncWrite + Unpin,
    {
        let name = self.server_name(host);
        let server_name = ServerName::try_from(name.to_string())
            .map_err(|e| TlsError::InvalidServerName(format!("{name}: {e}")))?;

        debug!(server_name = name, "initiating TLS handshake");

        self.inner
            .connect(server_name, stream)
            .await
            .map_err(|e| TlsError::Handshake(e.to_string()))
    }
}

fn build_client_config(config: &BrokerTlsConfig) -> TlsResult<ClientConfig> {
    let root_store = match &config.ca_cert_path {
        Some(ca_path) => load_root_store(ca_path)?,
        None => {
            debug!("using webpki root certificates");
            let mut root_store = RootCertStore::empty();
            root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            root_store
        }
    };

    let builder = ClientConfig::builder().with_root_certificates(root_store);

    match (&config.cert_path, &config.key_path) {
        (Some(cert_path), Some(key_path)) => {
            debug!("loading client certificate for mTLS");
            let certs = load_certificates(cert_path)?;
            let key = load_private_key(key_path)?;

            builder
                .with_client_auth_cert(certs, key)
                .map_err(|e| TlsError::Config(format!("failed to configure client auth: {e}")))
        }
        (None, None) => Ok(builder.with_no_client_auth()),
        _ => Err(TlsError::Config(
            "client certificate and key must be configured together".to_string(),
        )),
    }
}
