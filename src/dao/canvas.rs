//! Typed access to the canvas collections on top of a [`DocumentStore`].

use std::sync::Arc;

use futures::{StreamExt, stream::BoxStream};
use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    dao::{
        document_store::{
            ChangeStream, CommitReceipt, Document, DocumentStore, DocumentWrite, WriteBatch,
        },
        models::{CellEntity, UserEntity, from_document, to_document},
        storage::{StorageError, StorageResult},
    },
    state::{
        board::{CellKey, Colour},
        gate::UserRecord,
    },
};

/// Live cells, keyed by `"{x}-{y}"`.
pub const PIXELS: &str = "pixels";
/// Per-identity cooldown records.
pub const USERS: &str = "users";
const HISTORY: &str = "history";
const PLACEMENT_TIME: &str = "placementTime";
const LAST_PLACEMENT_TIME: &str = "lastPlacementTime";

/// Stream of user-record snapshots for one identity.
pub type UserRecordStream = BoxStream<'static, StorageResult<UserRecord>>;

/// Collection holding the placement history of one live cell.
pub fn history_collection(cell_key: &str) -> String {
    format!("{PIXELS}/{cell_key}/{HISTORY}")
}

#[derive(Clone)]
pub struct CanvasRepository {
    store: Arc<dyn DocumentStore>,
}

impl CanvasRepository {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Follow every change of the live cells.
    pub async fn subscribe_cells(&self) -> StorageResult<ChangeStream> {
        self.store.subscribe(PIXELS).await
    }

    /// Follow the cooldown record of `uid`.
    pub async fn subscribe_user(&self, uid: &str) -> StorageResult<UserRecordStream> {
        let key = uid.to_owned();
        let stream = self.store.subscribe_document(USERS, uid).await?;
        Ok(stream
            .map(move |snapshot| snapshot.map(|document| user_record(&key, document.as_ref())))
            .boxed())
    }

    pub async fn find_cell(&self, key: CellKey) -> StorageResult<Option<CellEntity>> {
        let raw_key = key.to_string();
        self.store
            .get(PIXELS, &raw_key)
            .await?
            .map(|document| from_document(PIXELS, &raw_key, &document))
            .transpose()
    }

    /// Write a default cell at `key` unless one already exists. Returns whether it wrote.
    pub async fn seed_cell(&self, key: CellKey, colour: &Colour) -> StorageResult<bool> {
        let raw_key = key.to_string();
        if self.store.get(PIXELS, &raw_key).await?.is_some() {
            return Ok(false);
        }
        let entity = CellEntity {
            x: key.x,
            y: key.y,
            colour: colour.to_string(),
            uid: None,
            placement_time: None,
        };
        self.store
            .set(PIXELS, &raw_key, DocumentWrite::new(encode(PIXELS, &raw_key, &entity)?))
            .await?;
        Ok(true)
    }

    /// Atomically write the cell and the placer's cooldown record, both stamped with the
    /// store's commit time.
    pub async fn commit_placement(
        &self,
        key: CellKey,
        colour: &Colour,
        uid: &str,
    ) -> StorageResult<CommitReceipt> {
        let raw_key = key.to_string();
        let cell = CellEntity {
            x: key.x,
            y: key.y,
            colour: colour.to_string(),
            uid: Some(uid.to_owned()),
            placement_time: None,
        };
        let user = UserEntity {
            last_placement_time: None,
        };
        let batch = WriteBatch::new()
            .set(
                PIXELS,
                &raw_key,
                DocumentWrite::new(encode(PIXELS, &raw_key, &cell)?)
                    .with_server_timestamp(PLACEMENT_TIME),
            )
            .set(
                USERS,
                uid,
                DocumentWrite::new(encode(USERS, uid, &user)?)
                    .with_server_timestamp(LAST_PLACEMENT_TIME),
            );
        self.store.commit(batch).await
    }

    /// Copy a live-cell document into its history under `event_id`.
    pub async fn append_history(
        &self,
        cell_key: &str,
        event_id: &str,
        document: Document,
    ) -> StorageResult<()> {
        self.store
            .set(&history_collection(cell_key), event_id, DocumentWrite::new(document))
            .await?;
        Ok(())
    }

    /// Delete the whole history of `cell_key`, oldest first, `page_size` entries per batch.
    pub async fn prune_history(&self, cell_key: &str, page_size: usize) -> StorageResult<usize> {
        let collection = history_collection(cell_key);
        let mut deleted = 0;
        loop {
            let page = self
                .store
                .list(&collection, PLACEMENT_TIME, page_size)
                .await?;
            if page.is_empty() {
                break;
            }
            let batch = page
                .iter()
                .fold(WriteBatch::new(), |batch, (key, _)| batch.delete(&collection, key));
            self.store.commit(batch).await?;
            deleted += page.len();
            debug!(collection = %collection, deleted, "history page deleted");
        }
        Ok(deleted)
    }

    pub async fn health_check(&self) -> StorageResult<()> {
        self.store.health_check().await
    }
}

/// Whether a cell document still carries an unresolved server timestamp.
pub fn is_pending(document: &Document) -> bool {
    matches!(document.get(PLACEMENT_TIME), Some(Value::Null))
}

fn user_record(uid: &str, document: Option<&Document>) -> UserRecord {
    let Some(document) = document else {
        return UserRecord::Absent;
    };
    match from_document::<UserEntity>(USERS, uid, document) {
        Ok(UserEntity {
            last_placement_time: Some(at),
        }) => UserRecord::Present(at),
        Ok(UserEntity {
            last_placement_time: None,
        }) => UserRecord::Resolving,
        Err(err) => {
            warn!(uid, error = %err, "unreadable user record; treating as unresolved");
            UserRecord::Resolving
        }
    }
}

fn encode<T: serde::Serialize>(collection: &str, key: &str, entity: &T) -> StorageResult<Document> {
    to_document(entity).map_err(|source| StorageError::Malformed {
        collection: collection.to_owned(),
        key: key.to_owned(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime};

    use serde_json::json;

    use super::*;
    use crate::{
        dao::document_store::memory::InMemoryDocumentStore,
        state::cooldown::{Clock, TokioClock},
    };

    fn repository_with(store: &InMemoryDocumentStore) -> CanvasRepository {
        CanvasRepository::new(Arc::new(store.clone()))
    }

    fn red() -> Colour {
        "#E50000".parse().unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn placement_writes_cell_and_user_with_one_timestamp() {
        let clock = TokioClock::starting_at(SystemTime::UNIX_EPOCH + Duration::from_secs(10));
        let store = InMemoryDocumentStore::with_clock(Arc::new(clock));
        let repository = repository_with(&store);

        let receipt = repository
            .commit_placement(CellKey::new(3, 4), &red(), "u1")
            .await
            .unwrap();
        assert_eq!(receipt.committed_at, clock.now());

        let cell = repository.find_cell(CellKey::new(3, 4)).await.unwrap().unwrap();
        assert_eq!(cell.colour, "#E50000");
        assert_eq!(cell.uid.as_deref(), Some("u1"));
        assert_eq!(cell.placement_time, Some(receipt.committed_at));

        let mut records = repository.subscribe_user("u1").await.unwrap();
        assert_eq!(
            records.next().await.unwrap().unwrap(),
            UserRecord::Present(receipt.committed_at)
        );
    }

    #[tokio::test]
    async fn user_record_distinguishes_absent_and_resolving() {
        let store = InMemoryDocumentStore::new();
        let repository = repository_with(&store);
        let mut records = repository.subscribe_user("u1").await.unwrap();
        assert_eq!(records.next().await.unwrap().unwrap(), UserRecord::Absent);

        let Value::Object(pending) = json!({"lastPlacementTime": null}) else {
            unreachable!()
        };
        store.set(USERS, "u1", DocumentWrite::new(pending)).await.unwrap();
        assert_eq!(records.next().await.unwrap().unwrap(), UserRecord::Resolving);
    }

    #[tokio::test]
    async fn seeding_leaves_existing_cells_alone() {
        let store = InMemoryDocumentStore::new();
        let repository = repository_with(&store);
        repository
            .commit_placement(CellKey::new(0, 0), &red(), "u1")
            .await
            .unwrap();

        let white: Colour = "#FFFFFF".parse().unwrap();
        assert!(!repository.seed_cell(CellKey::new(0, 0), &white).await.unwrap());
        assert!(repository.seed_cell(CellKey::new(0, 1), &white).await.unwrap());
        assert!(!repository.seed_cell(CellKey::new(0, 1), &white).await.unwrap());

        let cell = repository.find_cell(CellKey::new(0, 0)).await.unwrap().unwrap();
        assert_eq!(cell.colour, "#E50000");
    }

    #[tokio::test]
    async fn pruning_history_runs_in_pages_until_empty() {
        let store = InMemoryDocumentStore::new();
        let repository = repository_with(&store);
        for n in 0..7 {
            let Value::Object(entry) = json!({"colour": "#000000", "placementTime": n}) else {
                unreachable!()
            };
            repository
                .append_history("1-1", &format!("event-{n}"), entry)
                .await
                .unwrap();
        }

        assert_eq!(repository.prune_history("1-1", 3).await.unwrap(), 7);
        assert_eq!(repository.prune_history("1-1", 3).await.unwrap(), 0);
        assert!(
            store
                .list(&history_collection("1-1"), PLACEMENT_TIME, 10)
                .await
                .unwrap()
                .is_empty()
        );
    }
}
