//! Opaque per-device identity used as the owner of placements and cooldown records.

use std::{fmt, sync::Arc};

use futures::future::BoxFuture;
use serde::Serialize;
use tokio::sync::watch;
use tracing::info;
use uuid::Uuid;

use crate::error::ServiceError;

/// Anonymous identity; also the key of the user's cooldown record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Source of the current identity.
pub trait IdentityProvider: Send + Sync {
    /// Follow identity changes; `None` while signed out.
    fn watch(&self) -> watch::Receiver<Option<Identity>>;
    /// Sign in without credentials, keeping the current identity if there is one.
    fn sign_in_anonymously(&self) -> BoxFuture<'static, Result<Identity, ServiceError>>;
    fn sign_out(&self);

    fn current(&self) -> Option<Identity> {
        self.watch().borrow().clone()
    }
}

/// Identity provider issuing a random UUID per device.
#[derive(Clone)]
pub struct AnonymousIdentity {
    tx: Arc<watch::Sender<Option<Identity>>>,
}

impl AnonymousIdentity {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Provider already signed in as `identity`, e.g. a device id persisted elsewhere.
    pub fn with_identity(identity: Identity) -> Self {
        let (tx, _rx) = watch::channel(Some(identity));
        Self { tx: Arc::new(tx) }
    }

    /// Replace the current identity, as when the device signs in as someone else.
    pub fn switch_to(&self, identity: Identity) {
        info!(uid = %identity, "identity changed");
        self.tx.send_replace(Some(identity));
    }
}

impl Default for AnonymousIdentity {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityProvider for AnonymousIdentity {
    fn watch(&self) -> watch::Receiver<Option<Identity>> {
        self.tx.subscribe()
    }

    fn sign_in_anonymously(&self) -> BoxFuture<'static, Result<Identity, ServiceError>> {
        let tx = self.tx.clone();
        Box::pin(async move {
            let mut issued = None;
            tx.send_if_modified(|current| match current {
                Some(identity) => {
                    issued = Some(identity.clone());
                    false
                }
                None => {
                    let identity = Identity::new(Uuid::new_v4().simple().to_string());
                    info!(uid = %identity, "signed in anonymously");
                    issued = Some(identity.clone());
                    *current = Some(identity);
                    true
                }
            });
            issued.ok_or_else(|| ServiceError::InvalidInput("sign-in produced no identity".into()))
        })
    }

    fn sign_out(&self) {
        if self.tx.send_replace(None).is_some() {
            info!("signed out");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn anonymous_sign_in_is_stable() {
        let provider = AnonymousIdentity::new();
        assert_eq!(provider.current(), None);

        let first = provider.sign_in_anonymously().await.unwrap();
        let second = provider.sign_in_anonymously().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.as_str().len(), 32);
        assert_eq!(provider.current(), Some(first));
    }

    #[tokio::test]
    async fn watchers_see_identity_changes() {
        let provider = AnonymousIdentity::with_identity(Identity::new("device-a"));
        let mut rx = provider.watch();
        assert_eq!(rx.borrow_and_update().as_ref().map(Identity::as_str), Some("device-a"));

        provider.switch_to(Identity::new("device-b"));
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().as_ref().map(Identity::as_str), Some("device-b"));

        provider.sign_out();
        rx.changed().await.unwrap();
        assert!(rx.borrow().is_none());
    }
}
