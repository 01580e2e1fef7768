/// Typed canvas collections on top of the document store.
pub mod canvas;
/// Document store abstraction and its backends.
pub mod document_store;
/// Database model definitions.
pub mod models;
/// Storage abstraction layer for database operations.
pub mod storage;
