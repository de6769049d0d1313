//! Storage error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Record serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database is not open")]
    NotOpen,

    #[error("Database is already open")]
    AlreadyOpen,

    #[error("Cannot register object store '{0}': schema is fixed once the database is open")]
    SchemaLocked(String),

    #[error("Unknown object store: {0}")]
    UnknownStore(String),

    #[error("Invalid object store name: {0}")]
    InvalidStoreName(String),

    #[error("Object store '{0}' was opened read-only")]
    ReadOnly(String),

    #[error("Stored schema version {found} is newer than requested version {requested}")]
    VersionDowngrade { found: i32, requested: i32 },

    #[error("Storage task failed: {0}")]
    Task(String),

    #[error("Request failed: {0}")]
    Request(String),
}
