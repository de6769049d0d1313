//! Database connection and transactions

use parking_lot::{Mutex, RwLock};
use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;

use crate::error::StorageError;
use crate::migrations::run_migrations;
use crate::store::{is_valid_identifier, ObjectStore, SchemaBuilder, StoreOptions};
use crate::Result;

pub const DEFAULT_SCHEMA_VERSION: i32 = 3;

/// One-time initialization for a collection, run when it is first created.
pub type InitFn = Box<dyn Fn(&SchemaBuilder<'_>) -> Result<()> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    ReadOnly,
    ReadWrite,
}

pub(crate) struct StoreSchema {
    pub name: String,
    pub options: StoreOptions,
    pub init: Option<InitFn>,
}

pub struct Database {
    /// Registered collections; frozen once the connection is open
    schemas: Arc<RwLock<Vec<StoreSchema>>>,
    conn: Arc<RwLock<Option<Arc<Mutex<Connection>>>>>,
    version: i32,
}

impl Database {
    pub fn new() -> Self {
        Self::with_version(DEFAULT_SCHEMA_VERSION)
    }

    pub fn with_version(version: i32) -> Self {
        Self {
            schemas: Arc::new(RwLock::new(Vec::new())),
            conn: Arc::new(RwLock::new(None)),
            version,
        }
    }

    pub fn version(&self) -> i32 {
        self.version
    }

    pub fn is_open(&self) -> bool {
        self.conn.read().is_some()
    }

    /// Register a collection. Only allowed before the database is opened.
    pub fn add_object_store(
        &self,
        name: &str,
        options: StoreOptions,
        init: Option<InitFn>,
    ) -> Result<()> {
        if self.is_open() {
            tracing::error!(store = %name, "Database is open, can't add object store");
            return Err(StorageError::SchemaLocked(name.to_string()));
        }
        if !is_valid_identifier(name) {
            return Err(StorageError::InvalidStoreName(name.to_string()));
        }

        let mut schemas = self.schemas.write();
        schemas.retain(|s| s.name != name);
        schemas.push(StoreSchema {
            name: name.to_string(),
            options,
            init,
        });
        Ok(())
    }

    pub async fn open<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref().to_path_buf();
        let label = path.display().to_string();

        self.open_with(label, move || {
            let conn = Connection::open(&path)?;

            // WAL mode for better concurrent performance
            let _: String =
                conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;

            Ok(conn)
        })
        .await
    }

    pub async fn open_in_memory(&self) -> Result<()> {
        self.open_with(":memory:".to_string(), || Ok(Connection::open_in_memory()?))
            .await
    }

    async fn open_with<F>(&self, label: String, connect: F) -> Result<()>
    where
        F: FnOnce() -> Result<Connection> + Send + 'static,
    {
        if self.is_open() {
            return Err(StorageError::AlreadyOpen);
        }

        let schemas = Arc::clone(&self.schemas);
        let version = self.version;
        let conn = tokio::task::spawn_blocking(move || -> Result<Connection> {
            let conn = connect()?;
            run_migrations(&conn, version, &schemas.read())?;
            Ok(conn)
        })
        .await
        .map_err(|e| StorageError::Task(e.to_string()))?
        .map_err(|e| {
            tracing::error!(database = %label, error = %e, "Failed to open database");
            e
        })?;

        let mut slot = self.conn.write();
        if slot.is_some() {
            return Err(StorageError::AlreadyOpen);
        }
        *slot = Some(Arc::new(Mutex::new(conn)));

        tracing::info!(database = %label, version, "Opened database");
        Ok(())
    }

    /// Run `request` against one collection inside a single SQLite
    /// transaction. Any error returned by `request` rolls back every write it
    /// made.
    pub async fn transaction<F, T>(
        &self,
        mode: TransactionMode,
        store: &str,
        request: F,
    ) -> Result<T>
    where
        F: FnOnce(&ObjectStore<'_>) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.read().clone().ok_or_else(|| {
            tracing::error!(store = %store, "Transaction on a database that is not open");
            StorageError::NotOpen
        })?;

        if !self.schemas.read().iter().any(|s| s.name == store) {
            return Err(StorageError::UnknownStore(store.to_string()));
        }

        let store_name = store.to_string();
        let outcome = tokio::task::spawn_blocking(move || -> Result<T> {
            let mut conn = conn.lock();
            let tx = conn.transaction()?;
            let result = {
                let handle = ObjectStore::new(&tx, &store_name, mode);
                request(&handle)?
            };
            tx.commit()?;
            Ok(result)
        })
        .await
        .map_err(|e| StorageError::Task(e.to_string()))?;

        if let Err(e) = &outcome {
            tracing::warn!(store = %store, error = %e, "Transaction aborted");
        }

        outcome
    }

    /// Release the connection. In-flight transactions finish first.
    pub fn close(&self) {
        if self.conn.write().take().is_some() {
            tracing::info!("Closed database");
        }
    }
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            schemas: Arc::clone(&self.schemas),
            conn: Arc::clone(&self.conn),
            version: self.version,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn open_pages() -> Database {
        let db = Database::new();
        db.add_object_store(
            "pages",
            StoreOptions::default(),
            Some(Box::new(|schema: &SchemaBuilder<'_>| {
                schema.create_index("url", false)
            })),
        )
        .unwrap();
        db.open_in_memory().await.unwrap();
        db
    }

    #[tokio::test]
    async fn test_transaction_commits() {
        let db = open_pages().await;

        let key = db
            .transaction(TransactionMode::ReadWrite, "pages", |store| {
                store.add(&json!({"url": "https://example.com"}))
            })
            .await
            .unwrap();

        let record = db
            .transaction(TransactionMode::ReadOnly, "pages", move |store| store.get(key))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.value["url"], "https://example.com");
    }

    #[tokio::test]
    async fn test_failed_transaction_leaves_no_partial_write() {
        let db = open_pages().await;

        let result: Result<()> = db
            .transaction(TransactionMode::ReadWrite, "pages", |store| {
                store.add(&json!({"url": "https://partial.test"}))?;
                Err(StorageError::Request("boom".to_string()))
            })
            .await;
        assert!(result.is_err());

        let count = db
            .transaction(TransactionMode::ReadOnly, "pages", |store| store.count())
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_schema_is_fixed_after_open() {
        let db = open_pages().await;
        let result = db.add_object_store("late", StoreOptions::default(), None);
        assert!(matches!(result, Err(StorageError::SchemaLocked(_))));

        let result = db
            .transaction(TransactionMode::ReadOnly, "late", |store| store.count())
            .await;
        assert!(matches!(result, Err(StorageError::UnknownStore(_))));
    }

    #[tokio::test]
    async fn test_closed_database_rejects_transactions() {
        let db = open_pages().await;
        db.close();
        assert!(!db.is_open());

        let result = db
            .transaction(TransactionMode::ReadOnly, "pages", |store| store.count())
            .await;
        assert!(matches!(result, Err(StorageError::NotOpen)));
    }

    #[tokio::test]
    async fn test_init_runs_once_per_version_bump() {
        let path = std::env::temp_dir().join(format!(
            "tabshell-storage-test-{}.db",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);
        let runs = Arc::new(AtomicUsize::new(0));

        let open = |version: i32| {
            let db = Database::with_version(version);
            let runs = Arc::clone(&runs);
            db.add_object_store(
                "pages",
                StoreOptions::default(),
                Some(Box::new(move |_: &SchemaBuilder<'_>| {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })),
            )
            .unwrap();
            db
        };

        let db = open(3);
        db.open(&path).await.unwrap();
        db.close();

        let db = open(3);
        db.open(&path).await.unwrap();
        db.close();
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        let db = open(2);
        assert!(matches!(
            db.open(&path).await,
            Err(StorageError::VersionDowngrade { found: 3, requested: 2 })
        ));

        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{}", path.display(), suffix));
        }
    }

    #[tokio::test]
    async fn test_failed_init_is_retried_on_next_open() {
        let path = std::env::temp_dir().join(format!(
            "tabshell-storage-retry-{}.db",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);
        let runs = Arc::new(AtomicUsize::new(0));

        let db = Database::new();
        db.add_object_store(
            "pages",
            StoreOptions::default(),
            Some(Box::new(|schema: &SchemaBuilder<'_>| {
                schema.create_index("url", false)?;
                Err(StorageError::Request("init failed".to_string()))
            })),
        )
        .unwrap();
        assert!(db.open(&path).await.is_err());
        assert!(!db.is_open());

        let db = Database::new();
        let counter = Arc::clone(&runs);
        db.add_object_store(
            "pages",
            StoreOptions::default(),
            Some(Box::new(move |schema: &SchemaBuilder<'_>| {
                counter.fetch_add(1, Ordering::SeqCst);
                schema.create_index("url", false)
            })),
        )
        .unwrap();
        db.open(&path).await.unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        let key = db
            .transaction(TransactionMode::ReadWrite, "pages", |store| {
                store.add(&json!({"url": "https://retry.test"}))
            })
            .await
            .unwrap();
        let keys = db
            .transaction(TransactionMode::ReadOnly, "pages", |store| {
                store.index_keys("url", &json!("https://retry.test"))
            })
            .await
            .unwrap();
        assert_eq!(keys, vec![key]);
        db.close();

        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{}", path.display(), suffix));
        }
    }
}
