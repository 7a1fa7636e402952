//! Transaction helpers
//!
//! - `execute_in_transaction()`: commit on `Ok`, rollback (via Drop) on `Err`
//! - `insert_documents()`: bulk insert of new ids inside a caller's transaction
//! - `upsert_document()`: insert-or-replace keyed by (database, collection, doc_id)

use rusqlite::{Connection, Transaction, TransactionBehavior, params};

use super::{DbError, Result};

/// Execute operation within a transaction.
///
/// ```rust,no_run
/// # use oxomo_core::db::execute_in_transaction;
/// # use rusqlite::{Connection, TransactionBehavior};
/// # fn example(conn: &mut Connection) -> oxomo_core::db::Result<()> {
/// execute_in_transaction(conn, TransactionBehavior::Immediate, |tx| {
///     tx.execute("DELETE FROM documents WHERE collection = ?1", ["tmp"])?;
///     Ok(())
/// })?;
/// # Ok(())
/// # }
/// ```
pub fn execute_in_transaction<F, T>(
    conn: &mut Connection,
    behavior: TransactionBehavior,
    operation: F,
) -> Result<T>
where
    F: FnOnce(&Transaction) -> Result<T>,
{
    let tx = conn.transaction_with_behavior(behavior)?;
    let result = operation(&tx)?;
    tx.commit()?;
    Ok(result)
}

/// Insert `(doc_id, body)` rows that must not exist yet.
///
/// An id already present in the collection fails with [`DbError::Duplicate`];
/// the caller's transaction is expected to roll the batch back.
pub fn insert_documents(
    tx: &Transaction,
    database: &str,
    collection: &str,
    rows: &[(String, String)],
) -> Result<usize> {
    let mut stmt = tx.prepare_cached(
        "INSERT INTO documents (database, collection, doc_id, body) VALUES (?1, ?2, ?3, ?4)",
    )?;
    for (doc_id, body) in rows {
        if let Err(e) = stmt.execute(params![database, collection, doc_id, body]) {
            let err = DbError::from(e);
            return Err(if err.is_unique_violation() {
                DbError::Duplicate {
                    collection: collection.to_string(),
                    doc_id: doc_id.clone(),
                }
            } else {
                err
            });
        }
    }
    Ok(rows.len())
}

/// Insert a document or replace the body of the existing one with the same id.
///
/// The original `seq` is kept on conflict, so insertion order survives
/// overwrites.
pub fn upsert_document(
    tx: &Transaction,
    database: &str,
    collection: &str,
    doc_id: &str,
    body: &str,
) -> Result<()> {
    tx.execute(
        "INSERT INTO documents (database, collection, doc_id, body)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(database, collection, doc_id)
         DO UPDATE SET body = excluded.body",
        params![database, collection, doc_id, body],
    )?;
    Ok(())
}
