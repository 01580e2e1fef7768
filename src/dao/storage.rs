use std::error::Error;
use thiserror::Error;

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error raised by storage backends regardless of the underlying database.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage unavailable: {message}")]
    Unavailable {
        message: String,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// The backend refused a write batch as a whole; none of its operations were applied.
    #[error("write batch aborted: {message}")]
    Aborted { message: String },
    /// A document could not be decoded into the expected model.
    #[error("malformed document `{collection}/{key}`")]
    Malformed {
        collection: String,
        key: String,
        #[source]
        source: serde_json::Error,
    },
    /// The backend closed a change subscription.
    #[error("subscription to `{collection}` closed by the store")]
    SubscriptionClosed { collection: String },
}

impl StorageError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        StorageError::Unavailable {
            message,
            source: Box::new(source),
        }
    }
}
