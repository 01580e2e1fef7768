//! Mirrors every live-cell write into the cell's history and clears the history when
//! the cell is removed.

use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    dao::{
        canvas::{CanvasRepository, is_pending},
        document_store::{ChangeKind, DocumentChange},
        storage::StorageResult,
    },
    error::ServiceError,
};

/// Entries deleted per batch when clearing a history.
pub const HISTORY_PAGE_SIZE: usize = 100;

pub fn spawn(repository: CanvasRepository) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(err) = run(repository).await {
            error!(error = %err, "history mirror stopped");
        }
    })
}

/// Follow the live cells until the subscription ends. The baseline batch is not mirrored.
pub async fn run(repository: CanvasRepository) -> Result<(), ServiceError> {
    let mut batches = repository.subscribe_cells().await?;
    match batches.next().await {
        Some(baseline) => {
            debug!(cells = baseline?.len(), "history mirror attached");
        }
        None => return Ok(()),
    }

    while let Some(batch) = batches.next().await {
        for change in batch?.changes {
            if let Err(err) = mirror_change(&repository, change).await {
                warn!(error = %err, "failed to mirror cell change");
            }
        }
    }
    Ok(())
}

/// Apply one live-cell change to the history collections.
pub async fn mirror_change(
    repository: &CanvasRepository,
    change: DocumentChange,
) -> StorageResult<()> {
    match change.kind {
        ChangeKind::Removed => {
            let deleted = repository
                .prune_history(&change.key, HISTORY_PAGE_SIZE)
                .await?;
            info!(key = %change.key, deleted, "cleared pixel history");
        }
        ChangeKind::Added | ChangeKind::Modified => {
            if is_pending(&change.document) {
                // the resolved document follows as a modification
                return Ok(());
            }
            let event_id = Uuid::new_v4().to_string();
            repository
                .append_history(&change.key, &event_id, change.document)
                .await?;
            debug!(key = %change.key, event_id, "recorded pixel history");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        dao::{
            canvas::history_collection,
            document_store::{DocumentStore, WriteBatch, memory::InMemoryDocumentStore},
        },
        state::board::{CellKey, Colour},
    };

    async fn history_len(store: &InMemoryDocumentStore, key: &str) -> usize {
        store
            .list(&history_collection(key), "placementTime", usize::MAX)
            .await
            .unwrap()
            .len()
    }

    #[tokio::test]
    async fn writes_are_mirrored_and_removal_clears_history() {
        let store = InMemoryDocumentStore::new().with_pending_echo();
        let repository = CanvasRepository::new(Arc::new(store.clone()));
        let colour: Colour = "#E50000".parse().unwrap();
        repository
            .commit_placement(CellKey::new(9, 9), &colour, "u0")
            .await
            .unwrap();

        let mirror = spawn(repository.clone());
        while store.subscriber_count() == 0 {
            tokio::task::yield_now().await;
        }

        for _ in 0..3 {
            repository
                .commit_placement(CellKey::new(1, 1), &colour, "u1")
                .await
                .unwrap();
        }
        while history_len(&store, "1-1").await < 3 {
            tokio::task::yield_now().await;
        }
        // baseline cell is not mirrored and pending echoes are skipped
        assert_eq!(history_len(&store, "9-9").await, 0);
        assert_eq!(history_len(&store, "1-1").await, 3);

        store
            .commit(WriteBatch::new().delete("pixels", "1-1"))
            .await
            .unwrap();
        while history_len(&store, "1-1").await > 0 {
            tokio::task::yield_now().await;
        }

        mirror.abort();
    }
}
