//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Storage error: {0}")]
    Storage(#[from] tabshell_storage::StorageError),

    #[error("Tab error: {0}")]
    Tab(#[from] tabshell_tabs::TabError),

    #[error("Surface error: {0}")]
    Surface(#[from] tabshell_surface::SurfaceError),

    #[error("History error: {0}")]
    History(#[from] tabshell_history::HistoryError),

    #[error("Session error: {0}")]
    Session(#[from] tabshell_session::SessionError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("No tab is selected")]
    NoSelectedTab,

    #[error("Tab {0} has no rendering surface")]
    NoSurface(String),
}

impl From<std::io::Error> for CoreError {
    fn from(e: std::io::Error) -> Self {
        CoreError::Config(e.to_string())
    }
}
