use std::{sync::Arc, time::SystemTime};

use async_stream::try_stream;
use futures::{StreamExt, TryStreamExt, future::BoxFuture, stream::BoxStream};
use mongodb::{
    Client, Collection, Database,
    bson::{self, doc},
    change_stream::event::{ChangeStreamEvent, OperationType},
    options::FullDocumentType,
};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{
    config::MongoConfig,
    connection::establish_connection,
    error::{MongoDaoError, MongoResult},
};
use crate::dao::{
    document_store::{
        ChangeBatch, ChangeStream, CommitReceipt, Document, DocumentChange, DocumentStore,
        DocumentStream, DocumentWrite, WriteBatch, WriteOp,
    },
    storage::StorageResult,
};

const ID_FIELD: &str = "_id";

#[derive(Clone)]
pub struct MongoDocumentStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    client: Client,
    database: Database,
}

impl MongoDocumentStore {
    /// Connect to the configured deployment, retrying until it answers.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let (client, database) =
            establish_connection(&config.options, &config.database_name).await?;
        info!(database = %config.database_name, "connected to MongoDB");
        let store = Self {
            inner: Arc::new(MongoInner { client, database }),
        };
        store.warn_without_replica_set().await;
        Ok(store)
    }

    /// Change streams and multi-document transactions only work against a replica set.
    async fn warn_without_replica_set(&self) {
        match self.inner.database.run_command(doc! { "hello": 1 }).await {
            Ok(reply) if reply.contains_key("setName") => {}
            Ok(_) => warn!("MongoDB is not a replica set; subscriptions and placements will fail"),
            Err(err) => warn!(error = %err, "could not inspect MongoDB topology"),
        }
    }

    fn collection(&self, collection: &str) -> Collection<Document> {
        self.inner
            .database
            .collection::<Document>(&collection_name(collection))
    }

    async fn ping(&self) -> MongoResult<()> {
        self.inner
            .database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    /// Wall-clock time of the primary, used for server timestamps.
    async fn server_time(&self) -> MongoResult<SystemTime> {
        let reply = self
            .inner
            .database
            .run_command(doc! { "hello": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        reply
            .get_datetime("localTime")
            .map(|time| time.to_system_time())
            .map_err(|err| MongoDaoError::ServerTime {
                message: err.to_string(),
            })
    }

    async fn watch_collection(&self, collection: String) -> MongoResult<ChangeStream> {
        let target = self.collection(&collection);
        // open the change stream before reading the baseline so no write falls in between
        let changes = target
            .watch()
            .full_document(FullDocumentType::UpdateLookup)
            .await
            .map_err(|source| MongoDaoError::Watch {
                collection: collection.clone(),
                source,
            })?;
        let baseline: Vec<Document> = target
            .find(doc! {})
            .await
            .map_err(|source| MongoDaoError::Read {
                collection: collection.clone(),
                source,
            })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::Read {
                collection: collection.clone(),
                source,
            })?;
        debug!(collection = %collection, documents = baseline.len(), "change stream opened");

        let stream: BoxStream<'static, StorageResult<ChangeBatch>> = Box::pin(try_stream! {
            yield ChangeBatch::new(
                baseline
                    .into_iter()
                    .filter_map(split_key)
                    .map(|(key, document)| DocumentChange::added(key, document))
                    .collect(),
            );
            let mut changes = Box::pin(changes);
            while let Some(event) = changes.next().await {
                let event = event.map_err(|source| MongoDaoError::Read {
                    collection: collection.clone(),
                    source,
                })?;
                if let Some(change) = document_change(event) {
                    yield ChangeBatch::new(vec![change]);
                }
            }
        });
        Ok(stream)
    }

    async fn watch_document(&self, collection: String, key: String) -> MongoResult<DocumentStream> {
        let target = self.collection(&collection);
        let changes = target
            .watch()
            .pipeline(vec![doc! { "$match": { "documentKey._id": key.as_str() } }])
            .full_document(FullDocumentType::UpdateLookup)
            .await
            .map_err(|source| MongoDaoError::Watch {
                collection: collection.clone(),
                source,
            })?;
        let current = target
            .find_one(doc! { "_id": key.as_str() })
            .await
            .map_err(|source| MongoDaoError::Read {
                collection: collection.clone(),
                source,
            })?;

        let stream: BoxStream<'static, StorageResult<Option<Document>>> = Box::pin(try_stream! {
            yield current.map(strip_id);
            let mut changes = Box::pin(changes);
            while let Some(event) = changes.next().await {
                let event = event.map_err(|source| MongoDaoError::Read {
                    collection: collection.clone(),
                    source,
                })?;
                match event.operation_type {
                    OperationType::Delete => yield None,
                    OperationType::Insert | OperationType::Update | OperationType::Replace => {
                        yield event.full_document.map(strip_id);
                    }
                    _ => {}
                }
            }
        });
        Ok(stream)
    }

    async fn find_document(&self, collection: String, key: String) -> MongoResult<Option<Document>> {
        let document = self
            .collection(&collection)
            .find_one(doc! { "_id": key.as_str() })
            .await
            .map_err(|source| MongoDaoError::Read { collection, source })?;
        Ok(document.map(strip_id))
    }

    async fn commit_batch(&self, batch: WriteBatch) -> MongoResult<CommitReceipt> {
        let committed_at = self.server_time().await?;
        let mut session = self
            .inner
            .client
            .start_session()
            .await
            .map_err(|source| MongoDaoError::Transaction { source })?;
        session
            .start_transaction()
            .await
            .map_err(|source| MongoDaoError::Transaction { source })?;

        // dropping the session before commit aborts the transaction
        for op in batch.into_ops() {
            match op {
                WriteOp::Set {
                    collection,
                    key,
                    write,
                } => {
                    let document = stored_document(&key, &write, committed_at);
                    self.collection(&collection)
                        .replace_one(doc! { "_id": key.as_str() }, &document)
                        .upsert(true)
                        .session(&mut session)
                        .await
                        .map_err(|source| MongoDaoError::Write { collection, source })?;
                }
                WriteOp::Delete { collection, key } => {
                    self.collection(&collection)
                        .delete_one(doc! { "_id": key.as_str() })
                        .session(&mut session)
                        .await
                        .map_err(|source| MongoDaoError::Write { collection, source })?;
                }
            }
        }

        session
            .commit_transaction()
            .await
            .map_err(|source| MongoDaoError::Transaction { source })?;
        Ok(CommitReceipt { committed_at })
    }

    async fn list_sorted(
        &self,
        collection: String,
        order_by: String,
        limit: usize,
    ) -> MongoResult<Vec<(String, Document)>> {
        let mut sort = bson::Document::new();
        sort.insert(order_by, 1);
        let documents: Vec<Document> = self
            .collection(&collection)
            .find(doc! {})
            .sort(sort)
            .limit(i64::try_from(limit).unwrap_or(i64::MAX))
            .await
            .map_err(|source| MongoDaoError::Read {
                collection: collection.clone(),
                source,
            })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::Read { collection, source })?;
        Ok(documents.into_iter().filter_map(split_key).collect())
    }
}

impl DocumentStore for MongoDocumentStore {
    fn subscribe(&self, collection: &str) -> BoxFuture<'static, StorageResult<ChangeStream>> {
        let store = self.clone();
        let collection = collection.to_owned();
        Box::pin(async move { store.watch_collection(collection).await.map_err(Into::into) })
    }

    fn subscribe_document(
        &self,
        collection: &str,
        key: &str,
    ) -> BoxFuture<'static, StorageResult<DocumentStream>> {
        let store = self.clone();
        let collection = collection.to_owned();
        let key = key.to_owned();
        Box::pin(async move {
            store
                .watch_document(collection, key)
                .await
                .map_err(Into::into)
        })
    }

    fn get(
        &self,
        collection: &str,
        key: &str,
    ) -> BoxFuture<'static, StorageResult<Option<Document>>> {
        let store = self.clone();
        let collection = collection.to_owned();
        let key = key.to_owned();
        Box::pin(async move { store.find_document(collection, key).await.map_err(Into::into) })
    }

    fn set(
        &self,
        collection: &str,
        key: &str,
        write: DocumentWrite,
    ) -> BoxFuture<'static, StorageResult<CommitReceipt>> {
        DocumentStore::commit(self, WriteBatch::new().set(collection, key, write))
    }

    fn commit(&self, batch: WriteBatch) -> BoxFuture<'static, StorageResult<CommitReceipt>> {
        let store = self.clone();
        Box::pin(async move { store.commit_batch(batch).await.map_err(Into::into) })
    }

    fn list(
        &self,
        collection: &str,
        order_by: &str,
        limit: usize,
    ) -> BoxFuture<'static, StorageResult<Vec<(String, Document)>>> {
        let store = self.clone();
        let collection = collection.to_owned();
        let order_by = order_by.to_owned();
        Box::pin(async move {
            store
                .list_sorted(collection, order_by, limit)
                .await
                .map_err(Into::into)
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.ping().await.map_err(Into::into) })
    }
}

/// Nested collection paths (`pixels/3-4/history`) become dotted collection names.
fn collection_name(collection: &str) -> String {
    collection.replace('/', ".")
}

fn stored_document(key: &str, write: &DocumentWrite, committed_at: SystemTime) -> Document {
    let mut document = write.resolve(Some(committed_at));
    document.insert(ID_FIELD.to_owned(), Value::String(key.to_owned()));
    document
}

fn strip_id(mut document: Document) -> Document {
    document.remove(ID_FIELD);
    document
}

fn split_key(mut document: Document) -> Option<(String, Document)> {
    match document.remove(ID_FIELD) {
        Some(Value::String(key)) => Some((key, document)),
        _ => None,
    }
}

fn document_change(event: ChangeStreamEvent<Document>) -> Option<DocumentChange> {
    let key = event
        .document_key
        .as_ref()
        .and_then(|key| key.get_str(ID_FIELD).ok())?
        .to_owned();
    match event.operation_type {
        OperationType::Insert => Some(DocumentChange::added(key, strip_id(event.full_document?))),
        OperationType::Update | OperationType::Replace => Some(DocumentChange::modified(
            key,
            strip_id(event.full_document?),
        )),
        OperationType::Delete => Some(DocumentChange::removed(key)),
        _ => None,
    }
}
