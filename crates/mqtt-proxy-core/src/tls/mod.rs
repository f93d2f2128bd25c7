//! TLS for both legs of the proxy.
//!
//! - [`TlsServerAcceptor`] terminates TLS for MQTT clients, optionally
//!   verifying client certificates.
//! - [`TlsConnector`] dials the upstream broker over TLS.
//!
//! Both use rustls with the ring crypto provider.

pub mod client;
pub mod server;

use std::io::BufReader;
use std::path::Path;

use rustls::crypto::ring::default_provider;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::RootCertStore;
use tracing::{debug, warn};

use crate::error::{TlsError, TlsResult};

pub use client::TlsConnector;
pub use server::TlsServerAcceptor;

/// Install the ring crypto provider if not already installed.
fn ensure_crypto_provider() {
    // already installed is fine
    let _ = CryptoProvider::install_default(default_provider());
}

/// Builds a trust store from the CA certificates in a PEM file.
fn load_root_store(ca_path: &Path) -> TlsResult<RootCertStore> {
    let mut root_store = RootCertStore::empty();

    let certs = load_certificates(ca_path)?;
    let (added, _ignored) = root_store.add_parsable_certificates(certs);
    debug!(added, path = %ca_path.display(), "added CA certificates to trust store");

    if added == 0 {
        return Err(TlsError::NoCertificates(ca_path.display().to_string()));
    }

    Ok(root_store)
}

/// Load certificates from a PEM file.
fn load_certificates(path: &Path) -> TlsResult<Vec<CertificateDer<'static>>> {
    let file = std::fs::File::open(path).map_err(|e| TlsError::CertificateLoad {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;

    let mut reader = BufReader::new(file);
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut reader)
        .filter_map(|result| match result {
            Ok(cert) => Some(cert),
            Err(e) => {
                warn!(error = %e, "skipping invalid certificate");
                None
            }
        })
        .collect();

    if certs.is_empty() {
        return Err(TlsError::NoCertificates(path.display().to_string()));
    }

    debug!(count = certs.len(), path = %path.display(), "loaded certificates");
    Ok(certs)
}

/// Load the first private key (PKCS#1, PKCS#8 or SEC1) from a PEM file.
fn load_private_key(path: &Path) -> TlsResult<PrivateKeyDer<'static>> {
    let file = std::fs::File::open(path).map_err(|e| TlsError::PrivateKeyLoad {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;

    let mut reader = BufReader::new(file);

    loop {
        match rustls_pemfile::read_one(&mut reader) {
            Ok(Some(rustls_pemfile::Item::Pkcs1Key(key))) => return Ok(PrivateKeyDer::Pkcs1(key)),
            Ok(Some(rustls_pemfile::Item::Pkcs8Key(key))) => return Ok(PrivateKeyDer::Pkcs8(key)),
            Ok(Some(rustls_pemfile::Item::Sec1Key(key))) => return Ok(PrivateKeyDer::Sec1(key)),
            Ok(Some(_)) => continue,
            Ok(None) => break,
            Err(e) => {
                return Err(TlsError::PrivateKeyLoad {
                    path: path.display().to_string(),
                    message: e.to_string(),
                });
            }
        }
    }

    Err(TlsError::NoPrivateKeys(path.display().to_string()))
}


#[cfg(test)]
mod tests {
    use super::test_fixtures::{pem_file, TEST_CERT, TEST_KEY};
    use super::*;

    #[test]
    fn test_load_certificates() {
        let cert_file = pem_file(TEST_CERT);
        let certs = load_certificates(cert_file.path()).unwrap();
        assert_eq!(certs.len(), 1);
    }

    #[test]
    fn test_load_private_key() {
        let key_file = pem_file(TEST_KEY);
        assert!(load_private_key(key_file.path()).is_ok());
    }

    #[test]
    fn test_key_file_without_key() {
        let cert_file = pem_file(TEST_CERT);
        assert!(matches!(
            load_private_key(cert_file.path()),
            Err(TlsError::NoPrivateKeys(_))
        ));
    }

    #[test]
    fn test_cert_file_without_cert() {
        let key_file = pem_file(TEST_KEY);
        assert!(matches!(
            load_certificates(key_file.path()),
            Err(TlsError::NoCertificates(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            load_certificates(Path::new("/nonexistent/cert.pem")),
            Err(TlsError::CertificateLoad { .. })
        ));
        assert!(matches!(
            load_private_key(Path::new("/nonexistent/key.pem")),
            Err(TlsError::PrivateKeyLoad { .. })
        ));
    }

    #[test]
    fn test_root_store_from_ca() {
        let cert_file = pem_file(TEST_CERT);
        let store = load_root_store(cert_file.path()).unwrap();
        assert_eq!(store.len(), 1);
    }
}
