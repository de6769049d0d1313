//! Recently closed sites
//!
//! A bounded FIFO over the `recently_closed` collection. The tracked count
//! is seeded by [`RecentlyClosedCache::initialize`] and afterwards only
//! moves on a successful insert-without-eviction, explicit removal and
//! clearing. It is
//! never re-read from storage, so concurrent writers can make it drift from
//! the persisted size.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use tabshell_storage::{Database, StoreOptions, TransactionMode};
use tabshell_tabs::{TabEvent, TabRecord};

use crate::error::SessionError;
use crate::Result;

pub const RECENTLY_CLOSED_STORE: &str = "recently_closed";

pub const DEFAULT_MAX_ENTRIES: usize = 10;

/// Persisted summary of a closed tab.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosedSite {
    pub url: String,
    pub title: String,
}

impl ClosedSite {
    fn from_tab(tab: &TabRecord) -> Option<Self> {
        tab.is_webview().then(|| Self {
            url: tab.url.clone(),
            title: tab.title.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecentlyClosedEntry {
    pub id: i64,
    #[serde(flatten)]
    pub site: ClosedSite,
}

pub struct RecentlyClosedCache {
    db: Database,
    max_entries: usize,
    /// `None` until initialized
    count: Arc<Mutex<Option<usize>>>,
}

impl RecentlyClosedCache {
    pub fn register_stores(db: &Database) -> Result<()> {
        db.add_object_store(RECENTLY_CLOSED_STORE, StoreOptions::default(), None)?;
        Ok(())
    }

    /// A capacity of zero is raised to one.
    pub fn new(db: Database, max_entries: usize) -> Self {
        Self {
            db,
            max_entries: max_entries.max(1),
            count: Arc::new(Mutex::new(None)),
        }
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Tracked entry count. Zero before [`Self::initialize`].
    pub fn count(&self) -> usize {
        self.count.lock().unwrap_or(0)
    }

    /// Seed the tracked count from storage.
    pub async fn initialize(&self) -> Result<usize> {
        let stored = self
            .db
            .transaction(TransactionMode::ReadOnly, RECENTLY_CLOSED_STORE, |store| {
                store.count()
            })
            .await?;

        *self.count.lock() = Some(stored);
        tracing::debug!(
            count = stored,
            max = self.max_entries,
            "Initialized recently closed cache"
        );
        Ok(stored)
    }

    /// All entries, oldest first.
    pub async fn get_all(&self) -> Result<Vec<RecentlyClosedEntry>> {
        let entries = self
            .db
            .transaction(TransactionMode::ReadOnly, RECENTLY_CLOSED_STORE, |store| {
                store
                    .get_all()?
                    .into_iter()
                    .map(|record| -> tabshell_storage::Result<RecentlyClosedEntry> {
                        Ok(RecentlyClosedEntry {
                            id: record.key,
                            site: record.decode()?,
                        })
                    })
                    .collect::<tabshell_storage::Result<Vec<_>>>()
            })
            .await?;
        Ok(entries)
    }

    pub async fn remove(&self, id: i64) -> Result<()> {
        let removed = self
            .db
            .transaction(TransactionMode::ReadWrite, RECENTLY_CLOSED_STORE, move |store| {
                store.delete(id)
            })
            .await?;

        if !removed {
            return Err(SessionError::NotFound(id));
        }

        let mut count = self.count.lock();
        *count = Some(count.unwrap_or(0).saturating_sub(1));
        Ok(())
    }

    pub async fn remove_all(&self) -> Result<usize> {
        *self.count.lock() = Some(0);
        let removed = self
            .db
            .transaction(TransactionMode::ReadWrite, RECENTLY_CLOSED_STORE, |store| {
                store.clear()
            })
            .await?;

        tracing::info!(removed, "Cleared recently closed sites");
        Ok(removed)
    }

    /// Store `site`, evicting the oldest entry first when the tracked count
    /// has reached capacity.
    pub async fn add_entry(&self, site: ClosedSite) -> Result<RecentlyClosedEntry> {
        let evict = {
            let mut count = self.count.lock();
            let current = count.unwrap_or(0);
            if current >= self.max_entries {
                true
            } else {
                *count = Some(current + 1);
                false
            }
        };

        let result = self
            .db
            .transaction(TransactionMode::ReadWrite, RECENTLY_CLOSED_STORE, move |store| {
                if evict {
                    if let Some(evicted) = store.delete_first()? {
                        tracing::debug!(id = evicted, "Evicted oldest recently closed site");
                    }
                }
                let id = store.add(&site)?;
                Ok(RecentlyClosedEntry { id, site })
            })
            .await;

        let entry = match result {
            Ok(entry) => entry,
            Err(e) => {
                if !evict {
                    let mut count = self.count.lock();
                    *count = Some(count.unwrap_or(0).saturating_sub(1));
                }
                return Err(e.into());
            }
        };

        tracing::debug!(id = entry.id, url = %entry.site.url, "Remembered closed site");
        Ok(entry)
    }

    /// Record the tab that left the collection, if it hosted web content.
    pub async fn handle_tab_event(&self, event: &TabEvent) -> Result<Option<RecentlyClosedEntry>> {
        let tab = match event {
            TabEvent::Deleted { tab, .. } => tab,
            TabEvent::Replaced { old, .. } => old,
        };

        match ClosedSite::from_tab(tab) {
            Some(site) => Ok(Some(self.add_entry(site).await?)),
            None => Ok(None),
        }
    }

    /// Consume tab events until the channel closes. Failures are logged.
    pub fn spawn_listener(&self, mut events: broadcast::Receiver<TabEvent>) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        if let Err(e) = cache.handle_tab_event(&event).await {
                            tracing::warn!(error = %e, "Failed to remember closed tab");
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Recently closed listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            tracing::debug!("Recently closed listener stopped");
        })
    }
}

impl Clone for RecentlyClosedCache {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            max_entries: self.max_entries,
            count: Arc::clone(&self.count),
        }
    }
}
