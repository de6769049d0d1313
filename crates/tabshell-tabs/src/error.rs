//! Tab error types

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TabError {
    #[error("Tab not found: {0}")]
    NotFound(String),

    #[error("Tab already exists: {0}")]
    DuplicateId(String),

    #[error("Tab index {index} out of range for {len} tabs")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}
