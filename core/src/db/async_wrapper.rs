//! Async bridge for the sync SQLite pool
//!
//! SQLite calls block, so every store operation runs on tokio's blocking
//! thread pool via `spawn_blocking` with a connection checked out of the r2d2
//! pool inside the blocking task.

use rusqlite::Connection;

use super::{DbError, DbPool, Result};

/// Execute a sync database operation from async code.
///
/// ```rust,no_run
/// # use oxomo_core::db::{initialize_pool, with_connection};
/// # async fn example() -> oxomo_core::db::Result<()> {
/// let pool = initialize_pool(std::path::Path::new("oxomo.db"), 4)?;
/// let count: i64 = with_connection(&pool, |conn| {
///     Ok(conn.query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?)
/// })
/// .await?;
/// # Ok(())
/// # }
/// ```
pub async fn with_connection<F, T>(pool: &DbPool, f: F) -> Result<T>
where
    F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let pool = pool.clone();

    tokio::task::spawn_blocking(move || {
        let mut conn = pool
            .get()
            .map_err(|e| DbError::Pool(format!("Failed to get connection: {e}")))?;
        f(&mut conn)
    })
    .await
    .map_err(|e| DbError::Transaction(format!("Task join error: {e}")))?
}
