//! Session error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Storage error: {0}")]
    Storage(#[from] tabshell_storage::StorageError),

    #[error("Recently closed entry not found: {0}")]
    NotFound(i64),
}
