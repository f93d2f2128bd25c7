//! Client certificate captured during the TLS handshake.

use std::fmt;

use rustls::pki_types::CertificateDer;

use crate::error::{TlsError, TlsResult};

/// The leaf certificate a client presented over mutual TLS.
///
/// The subject is parsed once at session start so hooks can read it without
/// touching DER.
#[derive(Clone, PartialEq, Eq)]
pub struct PeerCertificate {
    der: CertificateDer<'static>,
    subject: String,
    common_name: Option<String>,
}

impl PeerCertificate {
    /// Parses a DER-encoded X.509 certificate.
    pub fn from_der(der: CertificateDer<'static>) -> TlsResult<Self> {
        let (_, cert) = x509_parser::parse_x509_certificate(der.as_ref())
            .map_err(|e| TlsError::CertificateParse(e.to_string()))?;

        let subject = cert.subject().to_string();
        let common_name = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .map(str::to_string);

        Ok(Self {
            der,
            subject,
            common_name,
        })
    }

    /// Takes the peer's own certificate from a chain in TLS order.
    ///
    /// Returns `Ok(None)` when the chain is empty.
    pub fn from_chain(chain: &[CertificateDer<'static>]) -> TlsResult<Option<Self>> {
        chain.first().cloned().map(Self::from_der).transpose()
    }

    /// Subject distinguished name, e.g. `CN=device-1, O=Acme`.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// First common name in the subject, if any.
    pub fn common_name(&self) -> Option<&str> {
        self.common_name.as_deref()
    }

    pub fn der(&self) -> &CertificateDer<'static> {
        &self.der
    }
}

impl fmt::Debug for PeerCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerCertificate")
            .field("subject", &self.subject)
            .finish_non_exhaustive()
    }
}
