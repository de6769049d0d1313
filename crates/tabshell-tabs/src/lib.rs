//! tabshell Tab Collection
//!
//! The ordered tab list, the selection and the per-tab records live in one
//! immutable [`TabsState`] snapshot. Every change goes through
//! [`transition`], which reads the previous snapshot and builds a new one.

mod error;
mod manager;
mod state;
mod tab;

pub use error::TabError;
pub use manager::{TabEvent, TabStore};
pub use state::{transition, TabAction, TabsState};
pub use tab::{TabId, TabRecord, TabStatePatch, TabType};

pub type Result<T> = std::result::Result<T, TabError>;
