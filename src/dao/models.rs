//! Stored document shapes for cells and per-identity cooldown records.

use std::time::SystemTime;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use serde_with::{TimestampMilliSeconds, serde_as};

use crate::dao::{
    document_store::Document,
    storage::{StorageError, StorageResult},
};

/// Live cell document stored in the `pixels` collection under key `"{x}-{y}"`.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CellEntity {
    pub x: u32,
    pub y: u32,
    /// Hex colour (`#RRGGBB`).
    pub colour: String,
    /// Identity that placed the colour; seeded cells have none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    /// Store-assigned placement time; null while the server timestamp is pending.
    #[serde_as(as = "Option<TimestampMilliSeconds<i64>>")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placement_time: Option<SystemTime>,
}

/// Per-identity cooldown document stored in the `users` collection.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserEntity {
    /// Last successful placement; null while the server timestamp is pending.
    #[serde_as(as = "Option<TimestampMilliSeconds<i64>>")]
    #[serde(default)]
    pub last_placement_time: Option<SystemTime>,
}

/// Serialise an entity into a raw document.
pub fn to_document<T: Serialize>(entity: &T) -> serde_json::Result<Document> {
    match serde_json::to_value(entity)? {
        Value::Object(map) => Ok(map),
        other => Err(serde::ser::Error::custom(format!(
            "expected an object, got {other}"
        ))),
    }
}

/// Decode a raw document, attributing failures to `collection/key`.
pub fn from_document<T: DeserializeOwned>(
    collection: &str,
    key: &str,
    document: &Document,
) -> StorageResult<T> {
    serde_json::from_value(Value::Object(document.clone())).map_err(|source| {
        StorageError::Malformed {
            collection: collection.to_owned(),
            key: key.to_owned(),
            source,
        }
    })
}
