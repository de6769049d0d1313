//! tabshell Storage Layer
//!
//! Named record collections on top of SQLite. Every unit of work runs inside
//! one SQLite transaction scoped to a single collection: it either commits as
//! a whole or leaves nothing behind.

mod database;
mod error;
mod migrations;
mod store;

pub use database::{Database, InitFn, TransactionMode, DEFAULT_SCHEMA_VERSION};
pub use error::StorageError;
pub use store::{ObjectStore, Record, SchemaBuilder, StoreOptions};

pub type Result<T> = std::result::Result<T, StorageError>;
