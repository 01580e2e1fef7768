//! Keeps a session's [`Replica`] in step with the live cells of the store.

use futures::StreamExt;
use tokio::{
    sync::{broadcast, watch},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

use crate::{
    dao::canvas::CanvasRepository,
    state::replica::{Replica, ReplicaDelta, ReplicaView},
};

/// Start reconciling in the background. The view stays unloaded until the baseline arrives.
///
/// Every applied batch is also sent on `deltas`, in order, so consumers that need each
/// change do not depend on observing every version of the view.
pub fn spawn(
    repository: CanvasRepository,
    deltas: broadcast::Sender<ReplicaDelta>,
) -> (ReplicaView, JoinHandle<()>) {
    let (tx, rx) = watch::channel(Replica::new());
    let handle = tokio::spawn(run(repository, tx, deltas));
    (rx, handle)
}

/// Fold every change batch into the published replica until the subscription ends.
pub async fn run(
    repository: CanvasRepository,
    tx: watch::Sender<Replica>,
    deltas: broadcast::Sender<ReplicaDelta>,
) {
    let mut batches = match repository.subscribe_cells().await {
        Ok(stream) => stream,
        Err(err) => {
            error!(error = %err, "failed to subscribe to cells; board stays unloaded");
            tx.send_modify(Replica::fail);
            return;
        }
    };

    while let Some(next) = batches.next().await {
        match next {
            Ok(batch) => {
                let mut delta = None;
                tx.send_modify(|replica| {
                    replica.apply(&batch);
                    delta = Some(replica.delta());
                });
                let Some(delta) = delta else { continue };
                let first = delta.baseline;
                // no receivers is fine; the view still has the change
                let _ = deltas.send(delta);
                if first {
                    info!(cells = batch.len(), "board baseline loaded");
                } else {
                    debug!(changes = batch.len(), "applied cell changes");
                }
            }
            Err(err) => {
                error!(error = %err, "cell subscription failed; board stays unloaded");
                tx.send_modify(Replica::fail);
                return;
            }
        }
    }

    warn!("cell subscription ended by the store");
    tx.send_modify(Replica::fail);
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::{Value, json};

    use super::*;
    use crate::{
        dao::document_store::{
            DocumentStore, DocumentWrite, WriteBatch, memory::InMemoryDocumentStore,
        },
        state::{board::CellKey, replica::ReplicaPhase},
    };

    fn spawn_over(store: &InMemoryDocumentStore) -> (ReplicaView, JoinHandle<()>) {
        let (deltas, _rx) = broadcast::channel(16);
        spawn(CanvasRepository::new(Arc::new(store.clone())), deltas)
    }

    fn write(value: Value) -> DocumentWrite {
        match value {
            Value::Object(map) => DocumentWrite::new(map),
            other => panic!("expected object, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn replica_follows_batches() {
        let store = InMemoryDocumentStore::new();
        store
            .set("pixels", "0-0", write(json!({"x": 0, "y": 0, "colour": "#FFFFFF"})))
            .await
            .unwrap();
        let (mut view, _task) = spawn_over(&store);

        view.wait_for(Replica::is_live).await.unwrap();
        assert_eq!(view.borrow().len(), 1);

        store
            .commit(
                WriteBatch::new()
                    .set("pixels", "1-1", write(json!({"x": 1, "y": 1, "colour": "#E50000"})))
                    .delete("pixels", "0-0"),
            )
            .await
            .unwrap();

        let replica = view
            .wait_for(|replica| replica.get(CellKey::new(1, 1)).is_some())
            .await
            .unwrap();
        assert_eq!(replica.len(), 1);
        assert!(replica.get(CellKey::new(0, 0)).is_none());
    }

    #[tokio::test]
    async fn subscription_failure_keeps_board_unloaded() {
        let store = InMemoryDocumentStore::new();
        store.set_available(false);
        let (mut view, task) = spawn_over(&store);

        task.await.unwrap();

        let replica = view.borrow_and_update();
        assert_eq!(replica.phase(), ReplicaPhase::Failed);
        assert!(replica.is_empty());
    }

    #[tokio::test]
    async fn closed_stream_fails_the_replica() {
        let store = InMemoryDocumentStore::new();
        let (mut view, task) = spawn_over(&store);
        view.wait_for(Replica::is_live).await.unwrap();

        store.close_subscriptions();
        task.await.unwrap();

        assert_eq!(view.borrow().phase(), ReplicaPhase::Failed);
    }

    #[tokio::test]
    async fn every_batch_is_published_as_a_delta() {
        let store = InMemoryDocumentStore::new();
        let (deltas, mut received) = broadcast::channel(16);
        let (mut view, _task) = spawn(CanvasRepository::new(Arc::new(store.clone())), deltas);
        view.wait_for(Replica::is_live).await.unwrap();
        assert!(received.recv().await.unwrap().baseline);

        // both commits land before the reconciler runs again
        store
            .set("pixels", "1-1", write(json!({"colour": "#E50000"})))
            .await
            .unwrap();
        store
            .set("pixels", "2-2", write(json!({"colour": "#0000EA"})))
            .await
            .unwrap();

        let first = received.recv().await.unwrap();
        let second = received.recv().await.unwrap();
        assert_eq!(first.written[0].key, CellKey::new(1, 1));
        assert_eq!(second.written[0].key, CellKey::new(2, 2));
        assert_eq!(second.version, first.version + 1);
    }
}
