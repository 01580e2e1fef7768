//! Document store abstraction the canvas rides on: change subscriptions,
//! point reads/writes and atomic multi-document batches.

pub mod memory;
#[cfg(feature = "mongo-store")]
pub mod mongodb;

use std::time::SystemTime;

use futures::{future::BoxFuture, stream::BoxStream};
use serde_json::{Map, Value};

use crate::dao::storage::StorageResult;

/// Raw document payload, a JSON object keyed by field name.
pub type Document = Map<String, Value>;

/// Ordered stream of change batches for a collection. The first batch is the baseline.
pub type ChangeStream = BoxStream<'static, StorageResult<ChangeBatch>>;

/// Stream of successive snapshots of a single document (`None` while it does not exist).
pub type DocumentStream = BoxStream<'static, StorageResult<Option<Document>>>;

/// Kind of change carried by a [`DocumentChange`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

/// One change notification for a document of a collection.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentChange {
    /// Key of the changed document inside its collection.
    pub key: String,
    pub kind: ChangeKind,
    /// Document content after the change (content before removal for `Removed`).
    pub document: Document,
}

impl DocumentChange {
    pub fn added(key: impl Into<String>, document: Document) -> Self {
        Self {
            key: key.into(),
            kind: ChangeKind::Added,
            document,
        }
    }

    pub fn modified(key: impl Into<String>, document: Document) -> Self {
        Self {
            key: key.into(),
            kind: ChangeKind::Modified,
            document,
        }
    }

    pub fn removed(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            kind: ChangeKind::Removed,
            document: Document::new(),
        }
    }
}

/// Group of changes delivered together. Changes must be applied in the given order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeBatch {
    pub changes: Vec<DocumentChange>,
}

impl ChangeBatch {
    pub fn new(changes: Vec<DocumentChange>) -> Self {
        Self { changes }
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Content written to a document, with fields the store fills with its own commit time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentWrite {
    pub fields: Document,
    /// Field names replaced by the store-assigned timestamp (milliseconds since the epoch).
    pub server_timestamps: Vec<String>,
}

impl DocumentWrite {
    pub fn new(fields: Document) -> Self {
        Self {
            fields,
            server_timestamps: Vec::new(),
        }
    }

    /// Mark `field` to be set to the server timestamp on commit.
    pub fn with_server_timestamp(mut self, field: impl Into<String>) -> Self {
        let field = field.into();
        self.fields.remove(&field);
        self.server_timestamps.push(field);
        self
    }

    /// Materialise the document with `timestamp` in every server-timestamp field.
    /// `None` leaves those fields null, which is how a pending write looks to readers.
    pub fn resolve(&self, timestamp: Option<SystemTime>) -> Document {
        let mut document = self.fields.clone();
        let value = timestamp.map(timestamp_value).unwrap_or(Value::Null);
        for field in &self.server_timestamps {
            document.insert(field.clone(), value.clone());
        }
        document
    }
}

/// Single operation inside a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Set {
        collection: String,
        key: String,
        write: DocumentWrite,
    },
    Delete {
        collection: String,
        key: String,
    },
}

/// Multi-document write applied with all-or-nothing semantics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(
        mut self,
        collection: impl Into<String>,
        key: impl Into<String>,
        write: DocumentWrite,
    ) -> Self {
        self.ops.push(WriteOp::Set {
            collection: collection.into(),
            key: key.into(),
            write,
        });
        self
    }

    pub fn delete(mut self, collection: impl Into<String>, key: impl Into<String>) -> Self {
        self.ops.push(WriteOp::Delete {
            collection: collection.into(),
            key: key.into(),
        });
        self
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Acknowledgement of a committed batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitReceipt {
    /// Timestamp the store wrote into every server-timestamp field of the batch.
    pub committed_at: SystemTime,
}

/// Abstraction over the remote document store backing the canvas.
pub trait DocumentStore: Send + Sync {
    /// Subscribe to every change of `collection`; the first batch enumerates live documents as `Added`.
    fn subscribe(&self, collection: &str) -> BoxFuture<'static, StorageResult<ChangeStream>>;
    /// Follow a single document; the first item is its current value.
    fn subscribe_document(
        &self,
        collection: &str,
        key: &str,
    ) -> BoxFuture<'static, StorageResult<DocumentStream>>;
    fn get(&self, collection: &str, key: &str)
    -> BoxFuture<'static, StorageResult<Option<Document>>>;
    fn set(
        &self,
        collection: &str,
        key: &str,
        write: DocumentWrite,
    ) -> BoxFuture<'static, StorageResult<CommitReceipt>>;
    /// Apply every operation of `batch` or none of them.
    fn commit(&self, batch: WriteBatch) -> BoxFuture<'static, StorageResult<CommitReceipt>>;
    /// First `limit` documents of `collection` ordered ascending by `order_by`.
    fn list(
        &self,
        collection: &str,
        order_by: &str,
        limit: usize,
    ) -> BoxFuture<'static, StorageResult<Vec<(String, Document)>>>;
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
}

/// Encode a timestamp the way documents store it.
pub fn timestamp_value(time: SystemTime) -> Value {
    let millis = time
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or(0);
    Value::from(millis)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;

    fn object(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other:?}"),
        }
    }

    #[test]
    fn server_timestamp_fields_are_filled_on_resolve() {
        let write = DocumentWrite::new(object(json!({"colour": "#E50000", "placementTime": 5})))
            .with_server_timestamp("placementTime");

        let at = SystemTime::UNIX_EPOCH + Duration::from_millis(1_234);
        let resolved = write.resolve(Some(at));
        assert_eq!(resolved.get("placementTime"), Some(&json!(1_234)));
        assert_eq!(resolved.get("colour"), Some(&json!("#E50000")));

        let pending = write.resolve(None);
        assert_eq!(pending.get("placementTime"), Some(&Value::Null));
    }

    #[test]
    fn write_batch_keeps_operation_order() {
        let batch = WriteBatch::new()
            .set("pixels", "1-1", DocumentWrite::default())
            .delete("pixels", "0-0");

        assert!(matches!(&batch.ops()[0], WriteOp::Set { key, .. } if key == "1-1"));
        assert!(matches!(&batch.ops()[1], WriteOp::Delete { key, .. } if key == "0-0"));
    }
}
