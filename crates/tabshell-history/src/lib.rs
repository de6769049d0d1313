//! tabshell History
//!
//! Timestamped navigation entries kept in the `history` collection. Range
//! queries deliver their results, most recent first, to a [`HistorySink`]
//! owned by the presentation layer.

mod error;
mod history;

pub use error::HistoryError;
pub use history::{HistoryEntry, HistoryManager, HistorySink, HistorySnapshot, HISTORY_STORE};

pub type Result<T> = std::result::Result<T, HistoryError>;
