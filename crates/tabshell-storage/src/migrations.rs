//! Schema upgrades
//!
//! The stored schema version gates collection creation: registered
//! collections are created, and their init functions run, only while
//! upgrading from an older version. An upgrade is all or nothing: a failed
//! init leaves neither its table nor a bumped version behind.

use rusqlite::Connection;

use crate::database::StoreSchema;
use crate::error::StorageError;
use crate::store::{create_table, table_exists, SchemaBuilder};
use crate::Result;

pub fn run_migrations(conn: &Connection, requested: i32, schemas: &[StoreSchema]) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    let current_version = get_schema_version(&tx)?;

    if current_version > requested {
        return Err(StorageError::VersionDowngrade {
            found: current_version,
            requested,
        });
    }

    if current_version < requested {
        tracing::info!(
            from = current_version,
            to = requested,
            "Upgrading storage schema"
        );

        for schema in schemas {
            if table_exists(&tx, &schema.name)? {
                continue;
            }

            tracing::debug!(store = %schema.name, "Creating object store");
            create_table(&tx, &schema.name, schema.options)?;
            if let Some(init) = &schema.init {
                init(&SchemaBuilder::new(&tx, &schema.name))?;
            }
        }

        set_schema_version(&tx, requested)?;
    }

    tx.commit()?;
    Ok(())
}

pub fn get_schema_version(conn: &Connection) -> Result<i32> {
    let result: std::result::Result<i32, _> =
        conn.query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        });

    match result {
        Ok(v) => Ok(v),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(0),
        Err(rusqlite::Error::SqliteFailure(_, _)) => {
            // Table doesn't exist yet
            conn.execute(
                "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
                [],
            )?;
            conn.execute("INSERT INTO schema_version (version) VALUES (0)", [])?;
            Ok(0)
        }
        Err(e) => Err(e.into()),
    }
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute(
        "INSERT INTO schema_version (version) VALUES (?1)",
        [version],
    )?;
    Ok(())
}
