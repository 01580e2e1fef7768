//! Follows the cooldown record of whichever identity is currently signed in.

use futures::StreamExt;
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, error, warn};

use crate::{
    dao::canvas::CanvasRepository,
    services::identity::Identity,
    state::gate::{PlacementGate, UserRecord},
};

/// How a single identity's subscription ended.
enum Outcome {
    IdentityChanged,
    Stopped,
    Shutdown,
}

pub fn spawn(
    repository: CanvasRepository,
    identity: watch::Receiver<Option<Identity>>,
    gate: PlacementGate,
) -> (watch::Receiver<UserRecord>, JoinHandle<()>) {
    let (tx, rx) = watch::channel(UserRecord::Unloaded);
    let handle = tokio::spawn(run(repository, identity, gate, tx));
    (rx, handle)
}

/// Re-subscribe on every identity change; the previous subscription is dropped first.
pub async fn run(
    repository: CanvasRepository,
    mut identity: watch::Receiver<Option<Identity>>,
    gate: PlacementGate,
    tx: watch::Sender<UserRecord>,
) {
    loop {
        let current = identity.borrow_and_update().clone();
        publish(&tx, &gate, UserRecord::Unloaded);

        let outcome = match current {
            Some(uid) => follow(&repository, &uid, &mut identity, &gate, &tx).await,
            None => Outcome::Stopped,
        };

        match outcome {
            Outcome::IdentityChanged => continue,
            Outcome::Stopped => {
                if identity.changed().await.is_err() {
                    return;
                }
            }
            Outcome::Shutdown => return,
        }
    }
}

async fn follow(
    repository: &CanvasRepository,
    uid: &Identity,
    identity: &mut watch::Receiver<Option<Identity>>,
    gate: &PlacementGate,
    tx: &watch::Sender<UserRecord>,
) -> Outcome {
    let mut records = match repository.subscribe_user(uid.as_str()).await {
        Ok(records) => records,
        Err(err) => {
            error!(uid = %uid, error = %err, "failed to subscribe to user record");
            return Outcome::Stopped;
        }
    };
    debug!(uid = %uid, "following user record");

    loop {
        tokio::select! {
            changed = identity.changed() => {
                return if changed.is_ok() { Outcome::IdentityChanged } else { Outcome::Shutdown };
            }
            next = records.next() => match next {
                Some(Ok(record)) => publish(tx, gate, record),
                Some(Err(err)) => {
                    error!(uid = %uid, error = %err, "user record subscription failed");
                    publish(tx, gate, UserRecord::Unloaded);
                    return Outcome::Stopped;
                }
                None => {
                    warn!(uid = %uid, "user record subscription ended by the store");
                    publish(tx, gate, UserRecord::Unloaded);
                    return Outcome::Stopped;
                }
            }
        }
    }
}

fn publish(tx: &watch::Sender<UserRecord>, gate: &PlacementGate, record: UserRecord) {
    gate.observe_record(record);
    tx.send_if_modified(|current| {
        if *current == record {
            false
        } else {
            *current = record;
            true
        }
    });
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use super::*;
    use crate::{
        dao::document_store::memory::InMemoryDocumentStore,
        services::identity::{AnonymousIdentity, IdentityProvider},
        state::board::{CellKey, Colour},
    };

    #[tokio::test]
    async fn identity_change_resubscribes() {
        let store = InMemoryDocumentStore::new();
        let repository = CanvasRepository::new(Arc::new(store.clone()));
        let colour: Colour = "#E50000".parse().unwrap();
        let receipt = repository
            .commit_placement(CellKey::new(0, 0), &colour, "device-b")
            .await
            .unwrap();

        let provider = AnonymousIdentity::with_identity(Identity::new("device-a"));
        let gate = PlacementGate::new(Duration::from_secs(1), Duration::from_millis(250));
        let (mut records, _task) = spawn(repository, provider.watch(), gate);

        records
            .wait_for(|record| *record == UserRecord::Absent)
            .await
            .unwrap();

        assert_eq!(store.subscriber_count(), 1);

        provider.switch_to(Identity::new("device-b"));
        records
            .wait_for(|record| *record == UserRecord::Present(receipt.committed_at))
            .await
            .unwrap();
        // the subscription for device-a is gone, not kept alongside
        assert_eq!(store.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn signed_out_session_stays_unloaded() {
        let store = InMemoryDocumentStore::new();
        let provider = AnonymousIdentity::new();
        let gate = PlacementGate::new(Duration::from_secs(1), Duration::from_millis(250));
        let (mut records, _task) = spawn(
            CanvasRepository::new(Arc::new(store.clone())),
            provider.watch(),
            gate,
        );

        tokio::task::yield_now().await;
        assert_eq!(*records.borrow(), UserRecord::Unloaded);

        provider.sign_in_anonymously().await.unwrap();
        records
            .wait_for(|record| *record == UserRecord::Absent)
            .await
            .unwrap();
    }
}
