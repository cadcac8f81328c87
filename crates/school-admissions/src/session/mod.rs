//! Authenticated identity held for the lifetime of a client session.
//!
//! The context is created explicitly, handed to whatever needs it, and torn down with
//! [`SessionContext::shutdown`]. Dependents observe identity changes through a
//! [`tokio::sync::watch`] receiver; when the context is torn down their receivers close.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::info;

/// Subject id issued by the external authentication service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IdentityId(pub String);

impl fmt::Display for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: IdentityId,
    pub email: String,
}

impl Identity {
    pub fn new(id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: IdentityId(id.into()),
            email: email.into(),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("no identity is signed in")]
    NotSignedIn,
}

/// Holder of the current identity.
pub struct SessionContext {
    identity: watch::Sender<Option<Identity>>,
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionContext {
    pub fn new() -> Self {
        let (identity, _) = watch::channel(None);
        Self { identity }
    }

    pub fn signed_in(identity: Identity) -> Self {
        let context = Self::new();
        context.sign_in(identity);
        context
    }

    /// Stores `identity`. Re-signing the same identity (a token refresh) does not notify.
    pub fn sign_in(&self, identity: Identity) {
        let changed = self.identity.send_if_modified(|current| {
            if current.as_ref() == Some(&identity) {
                return false;
            }
            *current = Some(identity.clone());
            true
        });

        if changed {
            info!(identity = %identity.id, "identity signed in");
        }
    }

    /// Clears the identity, returning the one that was signed in.
    pub fn sign_out(&self) -> Result<Identity, SessionError> {
        let previous = self.identity.send_replace(None);
        match previous {
            Some(identity) => {
                info!(identity = %identity.id, "identity signed out");
                Ok(identity)
            }
            None => Err(SessionError::NotSignedIn),
        }
    }

    pub fn current(&self) -> Option<Identity> {
        self.identity.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Identity>> {
        self.identity.subscribe()
    }

    /// Tears the session down. Receivers observe a cleared identity and then a closed channel.
    pub fn shutdown(self) {
        self.identity.send_replace(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sign_in_notifies_subscribers() {
        let session = SessionContext::new();
        let mut rx = session.subscribe();

        session.sign_in(Identity::new("u1", "admin@school.test"));
        rx.changed().await.expect("change delivered");
        assert_eq!(
            rx.borrow_and_update().as_ref().map(|identity| identity.id.0.as_str()),
            Some("u1")
        );
    }

    #[tokio::test]
    async fn refreshing_same_identity_is_silent() {
        let session = SessionContext::signed_in(Identity::new("u1", "admin@school.test"));
        let mut rx = session.subscribe();
        rx.borrow_and_update();

        session.sign_in(Identity::new("u1", "admin@school.test"));
        assert!(!rx.has_changed().expect("sender alive"));
    }

    #[test]
    fn sign_out_without_identity_leaves_state_intact() {
        let session = SessionContext::new();
        assert_eq!(session.sign_out(), Err(SessionError::NotSignedIn));
        assert!(session.current().is_none());
    }

    #[tokio::test]
    async fn shutdown_closes_receivers() {
        let session = SessionContext::signed_in(Identity::new("u1", "admin@school.test"));
        let mut rx = session.subscribe();
        rx.borrow_and_update();

        session.shutdown();
        rx.changed().await.expect("cleared identity delivered");
        assert!(rx.borrow_and_update().is_none());
        assert!(rx.changed().await.is_err());
    }
}
