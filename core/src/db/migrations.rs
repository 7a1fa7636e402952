//! Schema versioning and migrations
//!
//! Forward-only. The applied version lives in `PRAGMA user_version`.

use rusqlite::Connection;

use super::{DbError, Result};

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// Apply all migrations to bring DB to current version
pub fn migrate_to_latest(conn: &mut Connection) -> Result<()> {
    let current = get_schema_version(conn)?;
    if current > SCHEMA_VERSION {
        return Err(DbError::Migration(format!(
            "database schema v{current} is newer than supported v{SCHEMA_VERSION}"
        )));
    }

    if current < 1 {
        migration_v1(conn)?;
        set_schema_version(conn, 1)?;
        tracing::info!(version = 1, "applied store migration");
    }

    Ok(())
}

fn get_schema_version(conn: &Connection) -> Result<i32> {
    Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?)
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.pragma_update(None, "user_version", version)?;
    Ok(())
}

/// Migration V1: collection registry + JSON document table.
///
/// `seq` preserves insertion order for ledger snapshot reads.
fn migration_v1(conn: &mut Connection) -> Result<()> {
    let tx = conn.transaction()?;
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS collections (
             database   TEXT NOT NULL,
             name       TEXT NOT NULL,
             created_at TEXT NOT NULL,
             PRIMARY KEY (database, name)
         );
         CREATE TABLE IF NOT EXISTS documents (
             seq        INTEGER PRIMARY KEY AUTOINCREMENT,
             database   TEXT NOT NULL,
             collection TEXT NOT NULL,
             doc_id     TEXT NOT NULL,
             body       TEXT NOT NULL,
             UNIQUE (database, collection, doc_id)
         );
         CREATE INDEX IF NOT EXISTS idx_documents_collection
             ON documents (database, collection, seq);",
    )
    .map_err(|e| DbError::Migration(format!("v1: {e}")))?;
    tx.commit()?;
    Ok(())
}
