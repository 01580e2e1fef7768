//! MongoDB-backed [`DocumentStore`](super::DocumentStore).
//!
//! Multi-document batches run inside a transaction and change subscriptions ride on
//! change streams, so the deployment must be a replica set.

mod config;
mod connection;
mod error;
mod store;

pub use config::MongoConfig;
pub use error::MongoDaoError;
pub use store::MongoDocumentStore;

use crate::dao::storage::StorageError;

impl From<MongoDaoError> for StorageError {
    fn from(err: MongoDaoError) -> Self {
        match err {
            MongoDaoError::Transaction { source } => StorageError::Aborted {
                message: source.to_string(),
            },
            other => StorageError::unavailable(other.to_string(), other),
        }
    }
}
