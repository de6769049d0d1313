//! Surface error types

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SurfaceError {
    /// The surface does not implement an optional capability.
    #[error("Surface capability not supported: {0}")]
    Unsupported(&'static str),

    #[error("Display root error: {0}")]
    DisplayRoot(String),

    #[error("Invalid zoom factor: {0}")]
    InvalidZoom(f64),

    #[error("Surface dropped the {0} callback without answering")]
    CallbackDropped(&'static str),

    #[error("Surface operation failed: {0}")]
    Operation(String),

    #[error("Invalid content message: {0}")]
    InvalidMessage(String),

    #[error("Message proxy has been shut down")]
    ProxyClosed,
}
