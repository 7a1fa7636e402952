//! Document store abstraction
//!
//! The harvester persists schemaless JSON documents grouped into named
//! collections inside a database. Every document carries a string `_id`
//! unique within its collection.
//!
//! Writes go through [`DocumentStore::commit`], which applies a batch of
//! [`WriteOp`]s atomically. Single-operation helpers are provided on top of it.

mod sqlite;

pub use sqlite::SqliteStore;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::errors::StoreError;

/// Schemaless JSON object
pub type Document = Map<String, Value>;

/// Identifier field present on every stored document
pub const ID_FIELD: &str = "_id";

/// Read a document's `_id` as a string.
pub fn document_id(doc: &Document) -> Option<&str> {
    doc.get(ID_FIELD).and_then(Value::as_str)
}

/// Conjunction of top-level field equality clauses.
///
/// An empty filter matches every document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    clauses: Vec<(String, Value)>,
}

impl Filter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::all().and(field, value)
    }

    pub fn by_id(id: impl Into<String>) -> Self {
        Self::eq(ID_FIELD, id.into())
    }

    pub fn and(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.clauses.push((field.into(), value.into()));
        self
    }

    pub fn clauses(&self) -> &[(String, Value)] {
        &self.clauses
    }

    pub fn matches(&self, doc: &Document) -> bool {
        self.clauses
            .iter()
            .all(|(field, value)| doc.get(field) == Some(value))
    }
}

/// One write in an atomic batch.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Remove a collection and all its documents. No-op if absent.
    DropCollection { collection: String },
    /// Register a collection so it is listed even while empty.
    CreateCollection { collection: String },
    /// Insert; fails with [`StoreError::Duplicate`] if `_id` exists.
    InsertOne {
        collection: String,
        document: Document,
    },
    InsertMany {
        collection: String,
        documents: Vec<Document>,
    },
    /// Insert or replace by `_id`.
    UpsertOne {
        collection: String,
        document: Document,
    },
    /// Merge `set` into the first document matching `filter`. No-op if none.
    UpdateOne {
        collection: String,
        filter: Filter,
        set: Document,
    },
    DeleteMany { collection: String, filter: Filter },
}

/// Persistent store of JSON documents keyed by (database, collection, `_id`).
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Names of the collections present in `database`.
    async fn collection_names(&self, database: &str) -> Result<Vec<String>, StoreError>;

    /// Documents matching `filter`, in insertion order.
    async fn find(
        &self,
        database: &str,
        collection: &str,
        filter: &Filter,
    ) -> Result<Vec<Document>, StoreError>;

    /// Number of documents matching `filter`.
    async fn count(
        &self,
        database: &str,
        collection: &str,
        filter: &Filter,
    ) -> Result<u64, StoreError>;

    /// Apply `ops` in order as a single transaction.
    async fn commit(&self, database: &str, ops: Vec<WriteOp>) -> Result<(), StoreError>;

    async fn drop_collection(&self, database: &str, collection: &str) -> Result<(), StoreError> {
        self.commit(
            database,
            vec![WriteOp::DropCollection {
                collection: collection.to_string(),
            }],
        )
        .await
    }

    async fn insert_one(
        &self,
        database: &str,
        collection: &str,
        document: Document,
    ) -> Result<(), StoreError> {
        self.commit(
            database,
            vec![WriteOp::InsertOne {
                collection: collection.to_string(),
                document,
            }],
        )
        .await
    }

    async fn insert_many(
        &self,
        database: &str,
        collection: &str,
        documents: Vec<Document>,
    ) -> Result<(), StoreError> {
        self.commit(
            database,
            vec![WriteOp::InsertMany {
                collection: collection.to_string(),
                documents,
            }],
        )
        .await
    }

    async fn update_one(
        &self,
        database: &str,
        collection: &str,
        filter: Filter,
        set: Document,
    ) -> Result<(), StoreError> {
        self.commit(
            database,
            vec![WriteOp::UpdateOne {
                collection: collection.to_string(),
                filter,
                set,
            }],
        )
        .await
    }
}

/// Build a [`Document`] from a `serde_json::json!` object literal.
///
/// Non-object values produce an empty document.
pub fn doc(value: Value) -> Document {
    match value {
        Value::Object(map) => map,
        _ => Document::new(),
    }
}
