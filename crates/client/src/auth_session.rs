//! Session identity and bearer credential lookup.
//!
//! Token issuance and storage live outside this crate; the connection manager
//! only asks a [`TokenSource`] for the current credential each time it builds
//! an endpoint URL, so a refreshed token is picked up on the next reconnect.

use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

/// Stored session data
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AuthSession {
    pub user_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub token: String,
}

/// Supplies the bearer credential for real-time and history requests.
pub trait TokenSource: Send + Sync {
    /// Current token, or `None` when the user is signed out.
    fn token(&self) -> Option<String>;
}

impl<F> TokenSource for F
where
    F: Fn() -> Option<String> + Send + Sync,
{
    fn token(&self) -> Option<String> {
        self()
    }
}

impl TokenSource for AuthSession {
    fn token(&self) -> Option<String> {
        Some(self.token.clone())
    }
}

/// A session slot that can be replaced on login and cleared on logout while
/// managers holding it keep running.
#[derive(Clone, Debug, Default)]
pub struct SharedSession {
    inner: Arc<RwLock<Option<AuthSession>>>,
}

impl SharedSession {
    pub fn new(session: Option<AuthSession>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(session)),
        }
    }

    pub fn set(&self, session: AuthSession) {
        if let Ok(mut slot) = self.inner.write() {
            *slot = Some(session);
        }
    }

    pub fn clear(&self) {
        if let Ok(mut slot) = self.inner.write() {
            *slot = None;
        }
    }

    pub fn current(&self) -> Option<AuthSession> {
        self.inner.read().ok().and_then(|slot| slot.clone())
    }

    pub fn user_id(&self) -> Option<String> {
        self.current().map(|s| s.user_id)
    }
}

impl TokenSource for SharedSession {
    fn token(&self) -> Option<String> {
        self.current().map(|s| s.token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_session_tracks_login_and_logout() {
        let shared = SharedSession::default();
        assert_eq!(shared.token(), None);

        shared.set(AuthSession {
            user_id: "ana".into(),
            display_name: Some("Ana".into()),
            token: "t-1".into(),
        });
        let clone = shared.clone();
        assert_eq!(clone.token().as_deref(), Some("t-1"));
        assert_eq!(clone.user_id().as_deref(), Some("ana"));

        shared.clear();
        assert_eq!(clone.token(), None);
    }

    #[test]
    fn closures_are_token_sources() {
        let source = || Some("abc".to_string());
        assert_eq!(TokenSource::token(&source).as_deref(), Some("abc"));
    }
}
