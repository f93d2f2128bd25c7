//! Per-connection session relay.
//!
//! A session pairs one client link with one broker link. [`stream`] runs a
//! relay loop per direction, dispatches packets into the [`Handler`] hooks
//! and the optional [`Interceptor`], and folds both loop outcomes plus the
//! disconnect hook into one result.

mod certificate;
mod context;
mod handler;
mod interceptor;
mod stream;

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

pub use certificate::PeerCertificate;
pub use context::Context;
pub use handler::{Handler, NoopHandler};
pub use interceptor::Interceptor;
pub use stream::{stream, stream_with_codec};

/// Client id reported before CONNECT has been seen.
pub const UNKNOWN_CLIENT_ID: &str = "unknown";

/// Relay direction of a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Client to broker.
    Up,
    /// Broker to client.
    Down,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of the client behind one proxied connection.
///
/// `id`, `username` and `password` come from CONNECT and may be rewritten by
/// [`Handler::auth_connect`]. The peer certificate is fixed when the session
/// starts.
#[derive(Clone, PartialEq, Eq)]
pub struct Session {
    pub id: String,
    pub username: Option<String>,
    pub password: Option<Bytes>,
    pub peer_certificate: Option<Arc<PeerCertificate>>,
}

impl Session {
    pub fn new(peer_certificate: Option<PeerCertificate>) -> Self {
        Self {
            id: UNKNOWN_CLIENT_ID.to_string(),
            username: None,
            password: None,
            peer_certificate: peer_certificate.map(Arc::new),
        }
    }

    /// Common name of the client certificate, if one was presented.
    pub fn certificate_common_name(&self) -> Option<&str> {
        self.peer_certificate
            .as_deref()
            .and_then(PeerCertificate::common_name)
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new(None)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("peer_certificate", &self.peer_certificate)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_is_unknown() {
        let session = Session::default();
        assert_eq!(session.id, UNKNOWN_CLIENT_ID);
        assert!(session.username.is_none());
        assert!(session.certificate_common_name().is_none());
    }

    #[test]
    fn test_session_debug_redacts_password() {
        let session = Session {
            password: Some(Bytes::from_static(b"s3cret")),
            ..Session::default()
        };
        let rendered = format!("{session:?}");
        assert!(!rendered.contains("s3cret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_direction_display() {
        assert_eq!(Direction::Up.to_string(), "up");
        assert_eq!(Direction::Down.to_string(), "down");
    }
}
