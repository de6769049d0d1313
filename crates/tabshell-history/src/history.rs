//! History management

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tabshell_storage::{Database, Record, SchemaBuilder, StoreOptions, TransactionMode};

use crate::error::HistoryError;
use crate::Result;

pub const HISTORY_STORE: &str = "history";

/// Persisted document shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredEntry {
    url: String,
    title: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    date: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: i64,
    pub url: String,
    pub title: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub date: DateTime<Utc>,
}

impl HistoryEntry {
    fn from_record(record: &Record) -> tabshell_storage::Result<Self> {
        let stored: StoredEntry = record.decode()?;
        Ok(Self {
            id: record.key,
            url: stored.url,
            title: stored.title,
            date: stored.date,
        })
    }
}

/// Receives the result of every range query.
pub trait HistorySink: Send + Sync {
    fn update(&self, entries: Vec<HistoryEntry>);
}

/// In-memory sink holding the last delivered result set.
#[derive(Default)]
pub struct HistorySnapshot {
    entries: Arc<RwLock<Vec<HistoryEntry>>>,
}

impl HistorySnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<HistoryEntry> {
        self.entries.read().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl HistorySink for HistorySnapshot {
    fn update(&self, entries: Vec<HistoryEntry>) {
        *self.entries.write() = entries;
    }
}

impl Clone for HistorySnapshot {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
        }
    }
}

pub struct HistoryManager {
    db: Database,
    sink: Arc<dyn HistorySink>,
}

impl HistoryManager {
    /// Register the history collection. Must run before the database opens.
    pub fn register_stores(db: &Database) -> Result<()> {
        db.add_object_store(
            HISTORY_STORE,
            StoreOptions::default(),
            Some(Box::new(|schema: &SchemaBuilder<'_>| {
                schema.create_index("date", false)?;
                schema.create_index("url", false)
            })),
        )?;
        Ok(())
    }

    pub fn new(db: Database, sink: Arc<dyn HistorySink>) -> Self {
        Self { db, sink }
    }

    /// Record a visit stamped with the current time.
    pub async fn add_entry(&self, url: &str, title: &str) -> Result<HistoryEntry> {
        self.add_entry_at(url, title, Utc::now()).await
    }

    pub async fn add_entry_at(
        &self,
        url: &str,
        title: &str,
        date: DateTime<Utc>,
    ) -> Result<HistoryEntry> {
        let stored = StoredEntry {
            url: url.to_string(),
            title: title.to_string(),
            date,
        };

        let entry = self
            .db
            .transaction(TransactionMode::ReadWrite, HISTORY_STORE, move |store| {
                let id = store.add(&stored)?;
                Ok(HistoryEntry {
                    id,
                    url: stored.url,
                    title: stored.title,
                    date: stored.date,
                })
            })
            .await?;

        tracing::debug!(id = entry.id, url = %entry.url, "Added history entry");
        Ok(entry)
    }

    /// Correct the title of the most recent entry for `url`. Returns whether
    /// such an entry existed.
    pub async fn update_entry_title(&self, url: &str, title: &str) -> Result<bool> {
        let url = url.to_string();
        let title = title.to_string();

        let updated = self
            .db
            .transaction(TransactionMode::ReadWrite, HISTORY_STORE, move |store| {
                let Some(key) = store.index_keys("url", &Value::String(url))?.pop() else {
                    return Ok(false);
                };
                let Some(record) = store.get(key)? else {
                    return Ok(false);
                };

                let mut stored: StoredEntry = record.decode()?;
                stored.title = title;
                store.put(key, &stored)?;
                Ok(true)
            })
            .await?;
        Ok(updated)
    }

    /// Deliver entries dated within `[from, to]`, most recent first. Missing
    /// bounds are open.
    pub async fn retrieve_by_date(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<usize> {
        let from = from.map(|d| d.timestamp_millis());
        let to = to.map(|d| d.timestamp_millis());
        if let (Some(from), Some(to)) = (from, to) {
            if from > to {
                return Err(HistoryError::InvalidRange { from, to });
            }
        }

        let entries = self
            .db
            .transaction(TransactionMode::ReadOnly, HISTORY_STORE, move |store| {
                let lower = from.map(Value::from);
                let upper = to.map(Value::from);
                store
                    .index_range("date", lower.as_ref(), upper.as_ref())?
                    .iter()
                    .map(HistoryEntry::from_record)
                    .collect::<tabshell_storage::Result<Vec<_>>>()
            })
            .await?;

        Ok(self.deliver(entries))
    }

    /// Deliver entries at insertion positions `[from, to)`, counted from the
    /// oldest, most recent first. Missing bounds are open.
    pub async fn retrieve_by_pos(&self, from: Option<usize>, to: Option<usize>) -> Result<usize> {
        let offset = from.unwrap_or(0);
        if let Some(to) = to {
            if offset > to {
                return Err(HistoryError::InvalidRange {
                    from: offset as i64,
                    to: to as i64,
                });
            }
        }
        let limit = to.map(|to| to - offset);

        let entries = self
            .db
            .transaction(TransactionMode::ReadOnly, HISTORY_STORE, move |store| {
                store
                    .get_page(offset, limit)?
                    .iter()
                    .map(HistoryEntry::from_record)
                    .collect::<tabshell_storage::Result<Vec<_>>>()
            })
            .await?;

        Ok(self.deliver(entries))
    }

    pub async fn clear_by_ids(&self, ids: Vec<i64>) -> Result<usize> {
        let removed = self
            .db
            .transaction(TransactionMode::ReadWrite, HISTORY_STORE, move |store| {
                let mut removed = 0usize;
                for id in ids {
                    if store.delete(id)? {
                        removed += 1;
                    }
                }
                Ok(removed)
            })
            .await?;

        tracing::debug!(removed, "Cleared history entries");
        Ok(removed)
    }

    /// Remove everything and reset the sink.
    pub async fn clear_all(&self) -> Result<usize> {
        let removed = self
            .db
            .transaction(TransactionMode::ReadWrite, HISTORY_STORE, |store| store.clear())
            .await?;
        self.sink.update(Vec::new());

        tracing::info!(removed, "Cleared all history");
        Ok(removed)
    }

    pub async fn clear_by_url(&self, url: &str) -> Result<usize> {
        let url = url.to_string();
        let removed = self
            .db
            .transaction(TransactionMode::ReadWrite, HISTORY_STORE, move |store| {
                let mut removed = 0usize;
                for key in store.index_keys("url", &Value::String(url))? {
                    if store.delete(key)? {
                        removed += 1;
                    }
                }
                Ok(removed)
            })
            .await?;
        Ok(removed)
    }

    fn deliver(&self, mut entries: Vec<HistoryEntry>) -> usize {
        entries.reverse();
        let count = entries.len();
        self.sink.update(entries);
        count
    }
}
