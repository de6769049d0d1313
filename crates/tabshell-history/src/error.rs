//! History error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("Invalid history range: {from} > {to}")]
    InvalidRange { from: i64, to: i64 },

    #[error("Storage error: {0}")]
    Storage(#[from] tabshell_storage::StorageError),
}
