use mongodb::error::Error as MongoError;
use thiserror::Error;

pub type MongoResult<T> = std::result::Result<T, MongoDaoError>;

#[derive(Debug, Error)]
pub enum MongoDaoError {
    #[error("missing environment variable `{var}`")]
    MissingEnvVar { var: &'static str },
    #[error("failed to parse MongoDB connection URI `{uri}`")]
    InvalidUri {
        uri: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to build MongoDB client from options")]
    ClientConstruction {
        #[source]
        source: MongoError,
    },
    #[error("MongoDB ping failed during initial connection after {attempts} attempt(s)")]
    InitialPing {
        attempts: u32,
        #[source]
        source: MongoError,
    },
    #[error("MongoDB ping health check failed")]
    HealthPing {
        #[source]
        source: MongoError,
    },
    #[error("failed to open change stream on `{collection}`")]
    Watch {
        collection: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to read from `{collection}`")]
    Read {
        collection: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to write to `{collection}`")]
    Write {
        collection: String,
        #[source]
        source: MongoError,
    },
    #[error("transaction failed")]
    Transaction {
        #[source]
        source: MongoError,
    },
    #[error("server did not report its clock: {message}")]
    ServerTime { message: String },
}
