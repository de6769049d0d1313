//! tabshell Session Memory
//!
//! Keeps a bounded list of recently closed sites:
//! - Fed by tab close/replace events from the tab store
//! - Only web content tabs are remembered
//! - Oldest entry is evicted once the cache is full
//! - Survives restarts through the `recently_closed` collection

mod error;
mod recently_closed;

pub use error::SessionError;
pub use recently_closed::{
    ClosedSite, RecentlyClosedCache, RecentlyClosedEntry, DEFAULT_MAX_ENTRIES,
    RECENTLY_CLOSED_STORE,
};

pub type Result<T> = std::result::Result<T, SessionError>;
