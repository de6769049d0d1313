//! Object store handles
//!
//! An [`ObjectStore`] is only ever handed out inside a transaction and is
//! scoped to one named collection. Records are JSON documents keyed by an
//! integer primary key assigned on insert.

use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::database::TransactionMode;
use crate::error::StorageError;
use crate::Result;

/// Per-collection options fixed at registration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreOptions {
    /// Never reuse keys of deleted records.
    pub auto_increment: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            auto_increment: true,
        }
    }
}

/// A stored record: its key plus the JSON document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub key: i64,
    pub value: Value,
}

impl Record {
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.value.clone())?)
    }
}

pub(crate) fn is_valid_identifier(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

pub(crate) fn table_name(store: &str) -> String {
    format!("store_{}", store)
}

pub(crate) fn create_table(conn: &Connection, store: &str, options: StoreOptions) -> Result<()> {
    let key_column = if options.auto_increment {
        "key INTEGER PRIMARY KEY AUTOINCREMENT"
    } else {
        "key INTEGER PRIMARY KEY"
    };

    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {} ({}, value TEXT NOT NULL);",
        table_name(store),
        key_column
    ))?;
    Ok(())
}

pub(crate) fn table_exists(conn: &Connection, store: &str) -> Result<bool> {
    let found: Option<String> = conn
        .query_row(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table_name(store)],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Handed to a collection's init function while the schema is upgraded.
pub struct SchemaBuilder<'a> {
    conn: &'a Connection,
    store: &'a str,
}

impl<'a> SchemaBuilder<'a> {
    pub(crate) fn new(conn: &'a Connection, store: &'a str) -> Self {
        Self { conn, store }
    }

    pub fn store_name(&self) -> &str {
        self.store
    }

    /// Index a top-level field of the stored documents.
    pub fn create_index(&self, field: &str, unique: bool) -> Result<()> {
        if !is_valid_identifier(field) {
            return Err(StorageError::Request(format!(
                "invalid index field: {}",
                field
            )));
        }

        self.conn.execute_batch(&format!(
            "CREATE {}INDEX IF NOT EXISTS idx_{}_{} ON {} (json_extract(value, '$.{}'));",
            if unique { "UNIQUE " } else { "" },
            self.store,
            field,
            table_name(self.store),
            field
        ))?;

        tracing::debug!(store = %self.store, field = %field, unique, "Created index");
        Ok(())
    }
}

/// Request surface for one collection inside one transaction.
pub struct ObjectStore<'a> {
    conn: &'a Connection,
    name: &'a str,
    table: String,
    mode: TransactionMode,
}

impl<'a> ObjectStore<'a> {
    pub(crate) fn new(conn: &'a Connection, name: &'a str, mode: TransactionMode) -> Self {
        Self {
            conn,
            name,
            table: table_name(name),
            mode,
        }
    }

    pub fn name(&self) -> &str {
        self.name
    }

    fn ensure_writable(&self) -> Result<()> {
        match self.mode {
            TransactionMode::ReadWrite => Ok(()),
            TransactionMode::ReadOnly => Err(StorageError::ReadOnly(self.name.to_string())),
        }
    }

    /// Insert a new record and return its key.
    pub fn add<T: Serialize>(&self, value: &T) -> Result<i64> {
        self.ensure_writable()?;
        let json = serde_json::to_string(value)?;
        self.conn.execute(
            &format!("INSERT INTO {} (value) VALUES (?1)", self.table),
            [json],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Insert or overwrite the record stored under `key`.
    pub fn put<T: Serialize>(&self, key: i64, value: &T) -> Result<()> {
        self.ensure_writable()?;
        let json = serde_json::to_string(value)?;
        self.conn.execute(
            &format!(
                "INSERT OR REPLACE INTO {} (key, value) VALUES (?1, ?2)",
                self.table
            ),
            rusqlite::params![key, json],
        )?;
        Ok(())
    }

    pub fn get(&self, key: i64) -> Result<Option<Record>> {
        let raw: Option<String> = self
            .conn
            .query_row(
                &format!("SELECT value FROM {} WHERE key = ?1", self.table),
                [key],
                |row| row.get(0),
            )
            .optional()?;

        raw.map(|json| {
            Ok(Record {
                key,
                value: serde_json::from_str(&json)?,
            })
        })
        .transpose()
    }

    /// All records in key (insertion) order.
    pub fn get_all(&self) -> Result<Vec<Record>> {
        self.select(
            &format!("SELECT key, value FROM {} ORDER BY key ASC", self.table),
            Vec::new(),
        )
    }

    /// Records in key order, skipping `offset` and returning at most `limit`.
    pub fn get_page(&self, offset: usize, limit: Option<usize>) -> Result<Vec<Record>> {
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        self.select(
            &format!(
                "SELECT key, value FROM {} ORDER BY key ASC LIMIT ?1 OFFSET ?2",
                self.table
            ),
            vec![SqlValue::Integer(limit), SqlValue::Integer(offset as i64)],
        )
    }

    /// Records whose `field` lies within the inclusive bounds, ordered by
    /// that field. A missing bound is open.
    pub fn index_range(
        &self,
        field: &str,
        lower: Option<&Value>,
        upper: Option<&Value>,
    ) -> Result<Vec<Record>> {
        let extract = self.field_expr(field)?;
        self.select(
            &format!(
                "SELECT key, value FROM {table}
                 WHERE (?1 IS NULL OR {extract} >= ?1) AND (?2 IS NULL OR {extract} <= ?2)
                 ORDER BY {extract} ASC, key ASC",
                table = self.table,
                extract = extract
            ),
            vec![to_sql(lower), to_sql(upper)],
        )
    }

    /// Keys of every record whose `field` equals `value`, in key order.
    pub fn index_keys(&self, field: &str, value: &Value) -> Result<Vec<i64>> {
        let extract = self.field_expr(field)?;
        let mut stmt = self.conn.prepare(&format!(
            "SELECT key FROM {} WHERE {} = ?1 ORDER BY key ASC",
            self.table, extract
        ))?;
        let keys = stmt
            .query_map([to_sql(Some(value))], |row| row.get(0))?
            .collect::<std::result::Result<Vec<i64>, _>>()?;
        Ok(keys)
    }

    /// Returns whether a record was removed.
    pub fn delete(&self, key: i64) -> Result<bool> {
        self.ensure_writable()?;
        let removed = self
            .conn
            .execute(&format!("DELETE FROM {} WHERE key = ?1", self.table), [key])?;
        Ok(removed > 0)
    }

    /// Remove the oldest record, returning its key.
    pub fn delete_first(&self) -> Result<Option<i64>> {
        self.ensure_writable()?;
        let first: Option<i64> = self
            .conn
            .query_row(
                &format!("SELECT MIN(key) FROM {}", self.table),
                [],
                |row| row.get(0),
            )
            .optional()?
            .flatten();

        if let Some(key) = first {
            self.delete(key)?;
        }
        Ok(first)
    }

    pub fn clear(&self) -> Result<usize> {
        self.ensure_writable()?;
        Ok(self
            .conn
            .execute(&format!("DELETE FROM {}", self.table), [])?)
    }

    pub fn count(&self) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", self.table),
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn field_expr(&self, field: &str) -> Result<String> {
        if !is_valid_identifier(field) {
            return Err(StorageError::Request(format!("invalid field: {}", field)));
        }
        Ok(format!("json_extract(value, '$.{}')", field))
    }

    fn select(&self, sql: &str, params: Vec<SqlValue>) -> Result<Vec<Record>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(params), |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(key, json)| {
                Ok(Record {
                    key,
                    value: serde_json::from_str(&json)?,
                })
            })
            .collect()
    }
}

fn to_sql(value: Option<&Value>) -> SqlValue {
    match value {
        None | Some(Value::Null) => SqlValue::Null,
        Some(Value::Bool(b)) => SqlValue::Integer(i64::from(*b)),
        Some(Value::Number(n)) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Some(Value::String(s)) => SqlValue::Text(s.clone()),
        Some(other) => SqlValue::Text(other.to_string()),
    }
}
