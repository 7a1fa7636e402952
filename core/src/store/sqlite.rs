//! SQLite implementation of [`DocumentStore`].
//!
//! Documents live in a single `documents` table as JSON text keyed by
//! (database, collection, doc_id); `collections` registers collection names so
//! empty collections still exist. String equality clauses are pushed down to
//! `json_extract`; every candidate row is re-checked against the [`Filter`] in
//! Rust.

use std::path::Path;

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior, params};
use serde_json::Value;

use super::{Document, DocumentStore, Filter, ID_FIELD, WriteOp, document_id};
use crate::db::{self, DbError, DbPool, execute_in_transaction, with_connection};
use crate::errors::StoreError;

/// Document store on a pooled SQLite database file.
#[derive(Clone)]
pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    /// Open (creating and migrating if needed) the store at `path`.
    pub fn open(path: &Path, pool_size: u32) -> Result<Self, StoreError> {
        let pool = db::initialize_pool(path, pool_size).map_err(|e| {
            StoreError::backend_with_source(
                format!("failed to open store at {}", path.display()),
                e,
            )
        })?;
        Ok(Self { pool })
    }
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("max_connections", &self.pool.max_size())
            .finish()
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn collection_names(&self, database: &str) -> Result<Vec<String>, StoreError> {
        let database = database.to_string();
        with_connection(&self.pool, move |conn| {
            let mut stmt =
                conn.prepare("SELECT name FROM collections WHERE database = ?1 ORDER BY name")?;
            let names = stmt
                .query_map([&database], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(names)
        })
        .await
        .map_err(into_store_error)
    }

    async fn find(
        &self,
        database: &str,
        collection: &str,
        filter: &Filter,
    ) -> Result<Vec<Document>, StoreError> {
        let database = database.to_string();
        let collection = collection.to_string();
        let filter = filter.clone();
        with_connection(&self.pool, move |conn| {
            let rows = select_matching(conn, &database, &collection, &filter)?;
            Ok(rows.into_iter().map(|(_, doc)| doc).collect())
        })
        .await
        .map_err(into_store_error)
    }

    async fn count(
        &self,
        database: &str,
        collection: &str,
        filter: &Filter,
    ) -> Result<u64, StoreError> {
        let database = database.to_string();
        let collection = collection.to_string();
        let filter = filter.clone();
        with_connection(&self.pool, move |conn| {
            let rows = select_matching(conn, &database, &collection, &filter)?;
            Ok(rows.len() as u64)
        })
        .await
        .map_err(into_store_error)
    }

    async fn commit(&self, database: &str, ops: Vec<WriteOp>) -> Result<(), StoreError> {
        if ops.is_empty() {
            return Ok(());
        }
        let prepared = ops
            .into_iter()
            .map(prepare)
            .collect::<Result<Vec<_>, _>>()?;
        let database = database.to_string();

        with_connection(&self.pool, move |conn| {
            execute_in_transaction(conn, TransactionBehavior::Immediate, |tx| {
                let now = chrono::Utc::now().to_rfc3339();
                for op in &prepared {
                    apply(tx, &database, &now, op)?;
                }
                Ok(())
            })
        })
        .await
        .map_err(into_store_error)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Write preparation
// ─────────────────────────────────────────────────────────────────────────────

/// A [`WriteOp`] with ids resolved and bodies serialized, ready for the
/// blocking task.
enum PreparedOp {
    Drop(String),
    Create(String),
    Insert {
        collection: String,
        rows: Vec<(String, String)>,
    },
    Upsert {
        collection: String,
        id: String,
        body: String,
    },
    Update {
        collection: String,
        filter: Filter,
        set: Document,
    },
    Delete {
        collection: String,
        filter: Filter,
    },
}

fn prepare(op: WriteOp) -> Result<PreparedOp, StoreError> {
    Ok(match op {
        WriteOp::DropCollection { collection } => PreparedOp::Drop(collection),
        WriteOp::CreateCollection { collection } => PreparedOp::Create(collection),
        WriteOp::InsertOne {
            collection,
            document,
        } => {
            let row = encode(&collection, document)?;
            PreparedOp::Insert {
                collection,
                rows: vec![row],
            }
        }
        WriteOp::InsertMany {
            collection,
            documents,
        } => {
            let rows = documents
                .into_iter()
                .map(|d| encode(&collection, d))
                .collect::<Result<Vec<_>, _>>()?;
            PreparedOp::Insert { collection, rows }
        }
        WriteOp::UpsertOne {
            collection,
            document,
        } => {
            let (id, body) = encode(&collection, document)?;
            PreparedOp::Upsert {
                collection,
                id,
                body,
            }
        }
        WriteOp::UpdateOne {
            collection,
            filter,
            set,
        } => {
            if set.contains_key(ID_FIELD) {
                return Err(StoreError::InvalidDocument {
                    collection,
                    message: "update must not modify _id".to_string(),
                });
            }
            PreparedOp::Update {
                collection,
                filter,
                set,
            }
        }
        WriteOp::DeleteMany { collection, filter } => PreparedOp::Delete { collection, filter },
    })
}

/// Resolve `_id` (generating one when absent) and serialize the body.
fn encode(collection: &str, mut document: Document) -> Result<(String, String), StoreError> {
    let id = match document.get(ID_FIELD) {
        None => {
            let id = uuid::Uuid::new_v4().to_string();
            document.insert(ID_FIELD.to_string(), Value::String(id.clone()));
            id
        }
        Some(_) => match document_id(&document) {
            Some(id) => id.to_string(),
            None => {
                return Err(StoreError::InvalidDocument {
                    collection: collection.to_string(),
                    message: "_id must be a string".to_string(),
                });
            }
        },
    };
    let body = serde_json::to_string(&document).map_err(|e| StoreError::InvalidDocument {
        collection: collection.to_string(),
        message: e.to_string(),
    })?;
    Ok((id, body))
}

// ─────────────────────────────────────────────────────────────────────────────
// SQL
// ─────────────────────────────────────────────────────────────────────────────

fn apply(tx: &Transaction, database: &str, now: &str, op: &PreparedOp) -> db::Result<()> {
    match op {
        PreparedOp::Drop(collection) => {
            tx.execute(
                "DELETE FROM documents WHERE database = ?1 AND collection = ?2",
                params![database, collection],
            )?;
            tx.execute(
                "DELETE FROM collections WHERE database = ?1 AND name = ?2",
                params![database, collection],
            )?;
        }
        PreparedOp::Create(collection) => register(tx, database, collection, now)?,
        PreparedOp::Insert { collection, rows } => {
            register(tx, database, collection, now)?;
            db::insert_documents(tx, database, collection, rows)?;
        }
        PreparedOp::Upsert {
            collection,
            id,
            body,
        } => {
            register(tx, database, collection, now)?;
            db::transactions::upsert_document(tx, database, collection, id, body)?;
        }
        PreparedOp::Update {
            collection,
            filter,
            set,
        } => {
            let first = select_matching(tx, database, collection, filter)?
                .into_iter()
                .next();
            if let Some((seq, mut doc)) = first {
                for (key, value) in set {
                    doc.insert(key.clone(), value.clone());
                }
                tx.execute(
                    "UPDATE documents SET body = ?1 WHERE seq = ?2",
                    params![serde_json::to_string(&doc)?, seq],
                )?;
            }
        }
        PreparedOp::Delete { collection, filter } => {
            let mut stmt = tx.prepare_cached("DELETE FROM documents WHERE seq = ?1")?;
            for (seq, _) in select_matching(tx, database, collection, filter)? {
                stmt.execute([seq])?;
            }
        }
    }
    Ok(())
}

fn register(conn: &Connection, database: &str, collection: &str, now: &str) -> db::Result<()> {
    let exists = conn
        .query_row(
            "SELECT 1 FROM collections WHERE database = ?1 AND name = ?2",
            params![database, collection],
            |_| Ok(()),
        )
        .optional()?;
    if exists.is_none() {
        conn.execute(
            "INSERT INTO collections (database, name, created_at) VALUES (?1, ?2, ?3)",
            params![database, collection, now],
        )?;
    }
    Ok(())
}

/// Rows of `collection` matching `filter`, as (seq, document), in insertion
/// order.
fn select_matching(
    conn: &Connection,
    database: &str,
    collection: &str,
    filter: &Filter,
) -> db::Result<Vec<(i64, Document)>> {
    let mut sql = String::from(
        "SELECT seq, body FROM documents WHERE database = ?1 AND collection = ?2",
    );
    let mut args = vec![database.to_string(), collection.to_string()];

    for (field, value) in filter.clauses() {
        let Value::String(text) = value else {
            continue;
        };
        if field == ID_FIELD {
            args.push(text.clone());
            sql.push_str(&format!(" AND doc_id = ?{}", args.len()));
        } else if is_plain_field(field) {
            args.push(text.clone());
            sql.push_str(&format!(
                " AND json_extract(body, '$.{field}') = ?{}",
                args.len()
            ));
        }
    }
    sql.push_str(" ORDER BY seq");

    let mut stmt = conn.prepare(&sql)?;
    let raw = stmt
        .query_map(rusqlite::params_from_iter(args.iter()), |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut matched = Vec::with_capacity(raw.len());
    for (seq, body) in raw {
        let doc: Document = serde_json::from_str(&body)?;
        if filter.matches(&doc) {
            matched.push((seq, doc));
        }
    }
    Ok(matched)
}

/// Field names that can be spliced into a JSON path without quoting.
fn is_plain_field(field: &str) -> bool {
    !field.is_empty()
        && field
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn into_store_error(err: DbError) -> StoreError {
    match err {
        DbError::Duplicate { collection, doc_id } => StoreError::Duplicate {
            collection,
            id: doc_id,
        },
        other => StoreError::backend_with_source("sqlite store operation failed", other),
    }
}
