//! Connection pooling and pragma configuration

use std::path::Path;
use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;

use super::migrations::migrate_to_latest;
use super::{DbError, Result};

/// Pooled SQLite connections
pub type DbPool = Pool<SqliteConnectionManager>;

/// Writers wait this long on a locked database before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Open (or create) the database at `db_path`, migrate it to the latest
/// schema and return a pool of `pool_size` connections.
///
/// Every pooled connection runs in WAL mode with a busy timeout so concurrent
/// harvest workers can write through separate connections.
pub fn initialize_pool(db_path: &Path, pool_size: u32) -> Result<DbPool> {
    if let Some(parent) = db_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|e| {
            DbError::Pool(format!(
                "Failed to create database directory {}: {e}",
                parent.display()
            ))
        })?;
    }

    let manager = SqliteConnectionManager::file(db_path).with_init(apply_pragmas);
    let pool = Pool::builder()
        .max_size(pool_size.max(1))
        .build(manager)
        .map_err(|e| DbError::Pool(format!("Failed to build pool: {e}")))?;

    let mut conn = pool
        .get()
        .map_err(|e| DbError::Pool(format!("Failed to get connection: {e}")))?;
    verify_pragmas(&conn)?;
    migrate_to_latest(&mut conn)?;

    tracing::debug!(path = %db_path.display(), pool_size, "sqlite pool initialized");
    Ok(pool)
}

/// Per-connection pragmas.
fn apply_pragmas(conn: &mut Connection) -> std::result::Result<(), rusqlite::Error> {
    // journal_mode returns the resulting mode as a row
    let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", true)?;
    Ok(())
}

fn verify_pragmas(conn: &Connection) -> Result<()> {
    let mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
    if !mode.eq_ignore_ascii_case("wal") {
        return Err(DbError::Pool(format!(
            "expected WAL journal mode, got {mode}"
        )));
    }
    Ok(())
}
