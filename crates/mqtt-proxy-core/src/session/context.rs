//! Session context shared by both relay loops and every hook call.

use std::sync::{Arc, PoisonError, RwLock};

use tokio_util::sync::CancellationToken;

use super::{Session, UNKNOWN_CLIENT_ID};

/// Carries the session and its cancellation token.
///
/// Cloning is cheap; all clones see the same session. The session is only
/// written by the client-to-broker loop while it handles CONNECT, and the
/// lock is never held across an `.await`.
#[derive(Debug, Clone)]
pub struct Context {
    session: Option<Arc<RwLock<Session>>>,
    token: CancellationToken,
}

impl Context {
    pub fn new(session: Session, token: CancellationToken) -> Self {
        Self {
            session: Some(Arc::new(RwLock::new(session))),
            token,
        }
    }

    /// A context without a session, for driving hooks outside a relay.
    pub fn detached() -> Self {
        Self {
            session: None,
            token: CancellationToken::new(),
        }
    }

    /// Snapshot of the current session.
    pub fn session(&self) -> Option<Session> {
        self.with_session(Session::clone)
    }

    /// Runs `f` against the current session without cloning it.
    pub fn with_session<R>(&self, f: impl FnOnce(&Session) -> R) -> Option<R> {
        self.session.as_ref().map(|lock| {
            let guard = lock.read().unwrap_or_else(PoisonError::into_inner);
            f(&guard)
        })
    }

    /// Client id for log and error messages.
    pub fn client_id(&self) -> String {
        self.with_session(|s| s.id.clone())
            .unwrap_or_else(|| UNKNOWN_CLIENT_ID.to_string())
    }

    pub(crate) fn replace_session(&self, session: Session) {
        if let Some(lock) = &self.session {
            *lock.write().unwrap_or_else(PoisonError::into_inner) = session;
        }
    }

    /// Token cancelled when the session ends or the proxy shuts down.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}
