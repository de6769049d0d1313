//! tabshell Core
//!
//! Coordination layer of the browser. Tab actions go through the tab store;
//! each web content tab owns a surface controller whose notifications flow
//! back into tab state, history and the recently closed list.

mod browser;
mod config;
mod error;

pub use browser::{Browser, SurfaceFactory};
pub use config::{BackgroundPolicy, Config};
pub use error::CoreError;

// Re-export core components
pub use tabshell_history::{
    HistoryEntry, HistoryError, HistoryManager, HistorySink, HistorySnapshot,
};
pub use tabshell_session::{ClosedSite, RecentlyClosedCache, RecentlyClosedEntry, SessionError};
pub use tabshell_storage::{Database, StorageError};
pub use tabshell_surface::{
    DisplayRoot, LifecycleState, MessageProxy, NavState, RenderingSurface, SurfaceController,
    SurfaceError, SurfaceEvent, SurfaceNotification,
};
pub use tabshell_tabs::{TabAction, TabError, TabEvent, TabId, TabRecord, TabType, TabsState};

pub type Result<T> = std::result::Result<T, CoreError>;

/// Initialize logging. `RUST_LOG` wins over `filter`.
pub fn init_logging(filter: &str) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    if fmt().with_env_filter(filter).with_target(true).try_init().is_err() {
        tracing::debug!("Logging already initialized");
    }
}
