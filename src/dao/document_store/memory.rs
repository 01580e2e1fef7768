//! In-process document store with ordered change fan-out and atomic batches.
//!
//! Every subscriber observes commits in commit order: documents and subscriber
//! registry are updated under the same lock that orders notifications.

use std::{
    cmp::Ordering,
    collections::HashMap,
    io,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{self, AtomicBool, AtomicU64, AtomicUsize},
    },
    time::{Duration, SystemTime},
};

use dashmap::DashMap;
use futures::{StreamExt, future::BoxFuture};
use indexmap::IndexMap;
use serde_json::Value;
use tokio::{sync::mpsc, time::sleep};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;

use super::{
    ChangeBatch, ChangeKind, ChangeStream, CommitReceipt, Document, DocumentChange,
    DocumentStore, DocumentStream, DocumentWrite, WriteBatch, WriteOp,
};
use crate::{
    dao::storage::{StorageError, StorageResult},
    state::cooldown::{Clock, SystemClock},
};

type Collections = HashMap<String, IndexMap<String, Document>>;

#[derive(Clone)]
pub struct InMemoryDocumentStore {
    inner: Arc<MemoryInner>,
}

struct MemoryInner {
    collections: Mutex<Collections>,
    subscribers: DashMap<u64, Subscriber>,
    next_subscriber: AtomicU64,
    clock: Arc<dyn Clock>,
    commit_latency: Option<Duration>,
    pending_echo: bool,
    failing_commits: AtomicUsize,
    available: AtomicBool,
}

enum Subscriber {
    Collection {
        collection: String,
        tx: mpsc::UnboundedSender<StorageResult<ChangeBatch>>,
    },
    Document {
        collection: String,
        key: String,
        tx: mpsc::UnboundedSender<StorageResult<Option<Document>>>,
    },
}

/// Changes produced by one commit, tagged with their collection.
struct CommitChange {
    collection: String,
    change: DocumentChange,
    /// What readers see before the server timestamp resolves, when echoed.
    pending: Option<DocumentChange>,
}

impl Subscriber {
    /// Deliver the relevant part of a commit; returns `false` once the receiver is gone.
    fn notify(&self, changes: &[CommitChange], pending_phase: bool) -> bool {
        let pick = |entry: &CommitChange| -> Option<DocumentChange> {
            if pending_phase {
                entry.pending.clone()
            } else {
                Some(entry.change.clone())
            }
        };

        match self {
            Subscriber::Collection { collection, tx } => {
                let batch: Vec<DocumentChange> = changes
                    .iter()
                    .filter(|entry| &entry.collection == collection)
                    .filter_map(pick)
                    .collect();
                if batch.is_empty() {
                    return !tx.is_closed();
                }
                tx.send(Ok(ChangeBatch::new(batch))).is_ok()
            }
            Subscriber::Document {
                collection,
                key,
                tx,
            } => {
                for change in changes
                    .iter()
                    .filter(|entry| &entry.collection == collection && &entry.change.key == key)
                    .filter_map(pick)
                {
                    let snapshot = match change.kind {
                        ChangeKind::Removed => None,
                        ChangeKind::Added | ChangeKind::Modified => Some(change.document),
                    };
                    if tx.send(Ok(snapshot)).is_err() {
                        return false;
                    }
                }
                !tx.is_closed()
            }
        }
    }

    fn close(&self, err: impl Fn() -> StorageError) {
        match self {
            Subscriber::Collection { tx, .. } => {
                let _ = tx.send(Err(err()));
            }
            Subscriber::Document { tx, .. } => {
                let _ = tx.send(Err(err()));
            }
        }
    }
}

impl InMemoryDocumentStore {
    /// Create an empty store stamping commits with the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty store stamping commits with `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self::build(clock, None, false)
    }

    /// Delay every commit by `latency` before it is applied.
    pub fn with_commit_latency(self, latency: Duration) -> Self {
        Self::build(
            self.inner.clock.clone(),
            Some(latency),
            self.inner.pending_echo,
        )
    }

    /// Emit server-timestamped writes twice: first with the timestamp fields null, then resolved.
    pub fn with_pending_echo(self) -> Self {
        Self::build(self.inner.clock.clone(), self.inner.commit_latency, true)
    }

    fn build(clock: Arc<dyn Clock>, commit_latency: Option<Duration>, pending_echo: bool) -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                collections: Mutex::new(HashMap::new()),
                subscribers: DashMap::new(),
                next_subscriber: AtomicU64::new(0),
                clock,
                commit_latency,
                pending_echo,
                failing_commits: AtomicUsize::new(0),
                available: AtomicBool::new(true),
            }),
        }
    }

    /// Make the next `count` commits fail without applying anything.
    pub fn fail_next_commits(&self, count: usize) {
        self.inner
            .failing_commits
            .store(count, atomic::Ordering::SeqCst);
    }

    /// Toggle whether the store answers requests at all.
    pub fn set_available(&self, available: bool) {
        self.inner
            .available
            .store(available, atomic::Ordering::SeqCst);
    }

    /// Terminate every open subscription with an error.
    pub fn close_subscriptions(&self) {
        let _collections = self.inner.lock();
        for entry in self.inner.subscribers.iter() {
            let collection = match entry.value() {
                Subscriber::Collection { collection, .. }
                | Subscriber::Document { collection, .. } => collection.clone(),
            };
            entry.value().close(|| StorageError::SubscriptionClosed {
                collection: collection.clone(),
            });
        }
        self.inner.subscribers.clear();
    }

    /// Number of subscriptions whose receiver is still alive.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.retain(|_, subscriber| match subscriber {
            Subscriber::Collection { tx, .. } => !tx.is_closed(),
            Subscriber::Document { tx, .. } => !tx.is_closed(),
        });
        self.inner.subscribers.len()
    }
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryInner {
    fn lock(&self) -> MutexGuard<'_, Collections> {
        self.collections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_available(&self) -> StorageResult<()> {
        if self.available.load(atomic::Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StorageError::unavailable(
                "in-memory store offline".into(),
                io::Error::new(io::ErrorKind::NotConnected, "store offline"),
            ))
        }
    }

    fn take_failure(&self) -> bool {
        self.failing_commits
            .fetch_update(atomic::Ordering::SeqCst, atomic::Ordering::SeqCst, |left| {
                left.checked_sub(1)
            })
            .is_ok()
    }

    fn register(&self, subscriber: Subscriber) {
        let id = self.next_subscriber.fetch_add(1, atomic::Ordering::SeqCst);
        self.subscribers.insert(id, subscriber);
    }

    fn apply(&self, ops: Vec<WriteOp>, committed_at: SystemTime) -> CommitReceipt {
        let mut collections = self.lock();
        let mut changes = Vec::with_capacity(ops.len());

        for op in ops {
            match op {
                WriteOp::Set {
                    collection,
                    key,
                    write,
                } => {
                    let documents = collections.entry(collection.clone()).or_default();
                    let existed = documents.contains_key(&key);
                    let document = write.resolve(Some(committed_at));
                    documents.insert(key.clone(), document.clone());
                    changes.push(self.set_change(collection, key, existed, &write, document));
                }
                WriteOp::Delete { collection, key } => {
                    let removed = collections
                        .get_mut(&collection)
                        .and_then(|documents| documents.shift_remove(&key));
                    if let Some(previous) = removed {
                        changes.push(CommitChange {
                            collection,
                            change: DocumentChange {
                                key,
                                kind: ChangeKind::Removed,
                                document: previous,
                            },
                            pending: None,
                        });
                    }
                }
            }
        }

        if changes.iter().any(|entry| entry.pending.is_some()) {
            self.subscribers
                .retain(|_, subscriber| subscriber.notify(&changes, true));
        }
        self.subscribers
            .retain(|_, subscriber| subscriber.notify(&changes, false));
        drop(collections);

        debug!(changes = changes.len(), "in-memory batch committed");
        CommitReceipt { committed_at }
    }

    fn set_change(
        &self,
        collection: String,
        key: String,
        existed: bool,
        write: &DocumentWrite,
        document: Document,
    ) -> CommitChange {
        let kind = if existed {
            ChangeKind::Modified
        } else {
            ChangeKind::Added
        };

        if self.pending_echo && !write.server_timestamps.is_empty() {
            CommitChange {
                collection,
                pending: Some(DocumentChange {
                    key: key.clone(),
                    kind,
                    document: write.resolve(None),
                }),
                change: DocumentChange {
                    key,
                    kind: ChangeKind::Modified,
                    document,
                },
            }
        } else {
            CommitChange {
                collection,
                change: DocumentChange {
                    key,
                    kind,
                    document,
                },
                pending: None,
            }
        }
    }
}

impl DocumentStore for InMemoryDocumentStore {
    fn subscribe(&self, collection: &str) -> BoxFuture<'static, StorageResult<ChangeStream>> {
        let inner = self.inner.clone();
        let collection = collection.to_owned();
        Box::pin(async move {
            inner.ensure_available()?;
            let (tx, rx) = mpsc::unbounded_channel();
            {
                let collections = inner.lock();
                let baseline = collections
                    .get(&collection)
                    .map(|documents| {
                        documents
                            .iter()
                            .map(|(key, document)| DocumentChange::added(key, document.clone()))
                            .collect()
                    })
                    .unwrap_or_default();
                let _ = tx.send(Ok(ChangeBatch::new(baseline)));
                inner.register(Subscriber::Collection { collection, tx });
            }
            Ok(UnboundedReceiverStream::new(rx).boxed())
        })
    }

    fn subscribe_document(
        &self,
        collection: &str,
        key: &str,
    ) -> BoxFuture<'static, StorageResult<DocumentStream>> {
        let inner = self.inner.clone();
        let collection = collection.to_owned();
        let key = key.to_owned();
        Box::pin(async move {
            inner.ensure_available()?;
            let (tx, rx) = mpsc::unbounded_channel();
            {
                let collections = inner.lock();
                let current = collections
                    .get(&collection)
                    .and_then(|documents| documents.get(&key))
                    .cloned();
                let _ = tx.send(Ok(current));
                inner.register(Subscriber::Document {
                    collection,
                    key,
                    tx,
                });
            }
            Ok(UnboundedReceiverStream::new(rx).boxed())
        })
    }

    fn get(
        &self,
        collection: &str,
        key: &str,
    ) -> BoxFuture<'static, StorageResult<Option<Document>>> {
        let inner = self.inner.clone();
        let collection = collection.to_owned();
        let key = key.to_owned();
        Box::pin(async move {
            inner.ensure_available()?;
            let collections = inner.lock();
            Ok(collections
                .get(&collection)
                .and_then(|documents| documents.get(&key))
                .cloned())
        })
    }

    fn set(
        &self,
        collection: &str,
        key: &str,
        write: DocumentWrite,
    ) -> BoxFuture<'static, StorageResult<CommitReceipt>> {
        self.commit(WriteBatch::new().set(collection, key, write))
    }

    fn commit(&self, batch: WriteBatch) -> BoxFuture<'static, StorageResult<CommitReceipt>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            if let Some(latency) = inner.commit_latency {
                sleep(latency).await;
            }
            inner.ensure_available()?;
            if inner.take_failure() {
                return Err(StorageError::unavailable(
                    "commit rejected by in-memory store".into(),
                    io::Error::new(io::ErrorKind::ConnectionReset, "injected commit failure"),
                ));
            }
            let committed_at = inner.clock.now();
            Ok(inner.apply(batch.into_ops(), committed_at))
        })
    }

    fn list(
        &self,
        collection: &str,
        order_by: &str,
        limit: usize,
    ) -> BoxFuture<'static, StorageResult<Vec<(String, Document)>>> {
        let inner = self.inner.clone();
        let collection = collection.to_owned();
        let order_by = order_by.to_owned();
        Box::pin(async move {
            inner.ensure_available()?;
            let collections = inner.lock();
            let Some(documents) = collections.get(&collection) else {
                return Ok(Vec::new());
            };
            let mut entries: Vec<(String, Document)> = documents
                .iter()
                .map(|(key, document)| (key.clone(), document.clone()))
                .collect();
            entries.sort_by(|(_, a), (_, b)| compare_field(a.get(&order_by), b.get(&order_by)));
            entries.truncate(limit);
            Ok(entries)
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let inner = self.inner.clone();
        Box::pin(async move { inner.ensure_available() })
    }
}

/// Ascending order with missing and null values first.
fn compare_field(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(a)), Some(Value::Number(b))) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(a)), Some(Value::String(b))) => a.cmp(b),
        (None | Some(Value::Null), None | Some(Value::Null)) => Ordering::Equal,
        (None | Some(Value::Null), _) => Ordering::Less,
        (_, None | Some(Value::Null)) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;
    use serde_json::json;

    use super::*;
    use crate::state::cooldown::TokioClock;

    fn object(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other:?}"),
        }
    }

    fn cell(x: u32, y: u32, colour: &str) -> DocumentWrite {
        DocumentWrite::new(object(json!({"x": x, "y": y, "colour": colour})))
    }

    #[tokio::test]
    async fn first_batch_enumerates_live_documents() {
        let store = InMemoryDocumentStore::new();
        store.set("pixels", "0-0", cell(0, 0, "#FFFFFF")).await.unwrap();
        store.set("pixels", "1-1", cell(1, 1, "#FFFFFF")).await.unwrap();

        let mut stream = store.subscribe("pixels").await.unwrap();
        let baseline = stream.next().await.unwrap().unwrap();

        assert_eq!(baseline.len(), 2);
        assert!(baseline.changes.iter().all(|c| c.kind == ChangeKind::Added));
        assert_eq!(baseline.changes[0].key, "0-0");
    }

    #[tokio::test]
    async fn batches_arrive_in_commit_order() {
        let store = InMemoryDocumentStore::new();
        let mut stream = store.subscribe("pixels").await.unwrap();
        assert!(stream.next().await.unwrap().unwrap().is_empty());

        store.set("pixels", "0-0", cell(0, 0, "#FFFFFF")).await.unwrap();
        store.set("pixels", "0-0", cell(0, 0, "#E50000")).await.unwrap();
        store
            .commit(WriteBatch::new().delete("pixels", "0-0"))
            .await
            .unwrap();

        let kinds: Vec<ChangeKind> = [
            stream.next().await.unwrap().unwrap(),
            stream.next().await.unwrap().unwrap(),
            stream.next().await.unwrap().unwrap(),
        ]
        .iter()
        .map(|batch| batch.changes[0].kind)
        .collect();
        assert_eq!(
            kinds,
            vec![ChangeKind::Added, ChangeKind::Modified, ChangeKind::Removed]
        );
    }

    #[tokio::test]
    async fn failed_commit_applies_nothing() {
        let store = InMemoryDocumentStore::new();
        store.fail_next_commits(1);

        let batch = WriteBatch::new()
            .set("pixels", "3-4", cell(3, 4, "#E50000"))
            .set("users", "u1", DocumentWrite::default().with_server_timestamp("lastPlacementTime"));
        assert!(store.commit(batch.clone()).await.is_err());
        assert_eq!(store.get("pixels", "3-4").await.unwrap(), None);
        assert_eq!(store.get("users", "u1").await.unwrap(), None);

        store.commit(batch).await.unwrap();
        assert!(store.get("pixels", "3-4").await.unwrap().is_some());
        assert!(store.get("users", "u1").await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn server_timestamp_comes_from_the_store_clock() {
        let origin = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000);
        let store = InMemoryDocumentStore::with_clock(Arc::new(TokioClock::starting_at(origin)));
        tokio::time::sleep(Duration::from_millis(250)).await;

        let receipt = store
            .set(
                "users",
                "u1",
                DocumentWrite::default().with_server_timestamp("lastPlacementTime"),
            )
            .await
            .unwrap();

        assert_eq!(receipt.committed_at, origin + Duration::from_millis(250));
        let document = store.get("users", "u1").await.unwrap().unwrap();
        assert_eq!(document.get("lastPlacementTime"), Some(&json!(1_000_250)));
    }

    #[tokio::test]
    async fn pending_echo_precedes_resolved_document() {
        let store = InMemoryDocumentStore::new().with_pending_echo();
        let mut stream = store.subscribe_document("users", "u1").await.unwrap();
        assert_eq!(stream.next().await.unwrap().unwrap(), None);

        store
            .set(
                "users",
                "u1",
                DocumentWrite::default().with_server_timestamp("lastPlacementTime"),
            )
            .await
            .unwrap();

        let pending = stream.next().await.unwrap().unwrap().unwrap();
        assert_eq!(pending.get("lastPlacementTime"), Some(&Value::Null));
        let resolved = stream.next().await.unwrap().unwrap().unwrap();
        assert!(resolved.get("lastPlacementTime").unwrap().is_i64());
    }

    #[tokio::test]
    async fn list_orders_and_limits() {
        let store = InMemoryDocumentStore::new();
        for (key, time) in [("c", 30), ("a", 10), ("b", 20)] {
            store
                .set(
                    "history",
                    key,
                    DocumentWrite::new(object(json!({"placementTime": time}))),
                )
                .await
                .unwrap();
        }

        let page = store.list("history", "placementTime", 2).await.unwrap();
        let keys: Vec<&str> = page.iter().map(|(key, _)| key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn dropped_subscribers_are_pruned() {
        let store = InMemoryDocumentStore::new();
        let stream = store.subscribe("pixels").await.unwrap();
        assert_eq!(store.subscriber_count(), 1);
        drop(stream);
        assert_eq!(store.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn closing_subscriptions_surfaces_an_error() {
        let store = InMemoryDocumentStore::new();
        let mut stream = store.subscribe("pixels").await.unwrap();
        let _baseline = stream.next().await.unwrap();

        store.close_subscriptions();
        assert!(matches!(
            stream.next().await,
            Some(Err(StorageError::SubscriptionClosed { .. }))
        ));
        assert!(stream.next().await.is_none());
    }
}
