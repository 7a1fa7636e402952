//! SQLite layer backing the document store
//!
//! This module provides:
//! - Connection pooling (r2d2-sqlite) with WAL + busy timeout pragmas
//! - Transaction helpers
//! - Schema migrations tracked by `PRAGMA user_version`
//! - `spawn_blocking` bridge for async callers

pub mod async_wrapper;
pub mod connection;
pub mod migrations;
pub mod transactions;

pub use async_wrapper::with_connection;
pub use connection::{DbPool, initialize_pool};
pub use transactions::{execute_in_transaction, insert_documents};

/// Database module result type
pub type Result<T> = std::result::Result<T, DbError>;

/// Database error types
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Document encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("Duplicate document {doc_id} in {collection}")]
    Duplicate { collection: String, doc_id: String },
}

impl DbError {
    /// True when SQLite rejected a write because of a UNIQUE constraint.
    pub fn is_unique_violation(&self) -> bool {
        matches!(
            self,
            Self::Sqlite(rusqlite::Error::SqliteFailure(err, _))
                if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
        )
    }
}
