//! Outcome classification and persistence.
//!
//! Each processed ledger entry ends in exactly one sink (records, deleted,
//! sets or errors). The sink write, the removal of the same id from sibling
//! sinks, and the ledger `pending → done` transition are one store commit.
//!
//! Record and set errors share the errors sink, so error documents are keyed
//! `"<item_type>:<id>"` and carry the bare id in `id`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::adapter::{Record, RecordHeader};
use crate::checkpoint::{PendingSet, mark_done_op};
use crate::errors::{ProtocolError, StoreError};
use crate::namespace::Namespace;
use crate::retry::Attempted;
use crate::store::{Document, DocumentStore, Filter, ID_FIELD, WriteOp, doc};

/// Ledger the processed entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Record,
    Set,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Record => "record",
            Self::Set => "set",
        }
    }

    /// `_id` of this kind's error document for `id`.
    pub fn error_key(&self, id: &str) -> String {
        format!("{}:{id}", self.as_str())
    }
}

/// Persisted failure of one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub id: String,
    pub item_type: ItemKind,
    pub error_class: String,
    pub message: String,
    pub retryable: bool,
    pub attempts: u32,
}

impl ErrorRecord {
    pub fn from_protocol(
        id: &str,
        item_type: ItemKind,
        err: &ProtocolError,
        attempts: u32,
    ) -> Self {
        Self {
            id: id.to_string(),
            item_type,
            error_class: err.class(),
            message: err.to_string(),
            retryable: err.is_retryable(),
            attempts,
        }
    }

    pub fn key(&self) -> String {
        self.item_type.error_key(&self.id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Record metadata or set membership document, already carrying `_id`.
    Harvested { id: String, document: Document },
    /// Deletion tombstone (records only).
    Deleted { id: String },
    Failed(ErrorRecord),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    Harvested,
    Deleted,
    Failed,
}

impl Outcome {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            Self::Harvested { .. } => OutcomeKind::Harvested,
            Self::Deleted { .. } => OutcomeKind::Deleted,
            Self::Failed(_) => OutcomeKind::Failed,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Harvested { id, .. } | Self::Deleted { id } => id,
            Self::Failed(err) => &err.id,
        }
    }
}

/// Map a `GetRecord` attempt to its outcome.
pub fn classify_record(id: &str, attempted: Attempted<Record>) -> Outcome {
    match attempted.result {
        Err(err) => Outcome::Failed(ErrorRecord::from_protocol(
            id,
            ItemKind::Record,
            &err,
            attempted.attempts,
        )),
        Ok(record) if record.header.is_deleted() => Outcome::Deleted { id: id.to_string() },
        Ok(record) => {
            let mut document: Document = record
                .metadata
                .into_iter()
                .map(|(key, values)| {
                    let values = values.into_iter().map(Value::String).collect();
                    (key, Value::Array(values))
                })
                .collect();
            document.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
            Outcome::Harvested {
                id: id.to_string(),
                document,
            }
        }
    }
}

/// Map a per-set `ListIdentifiers` attempt to its outcome.
pub fn classify_set(set: &PendingSet, attempted: Attempted<Vec<RecordHeader>>) -> Outcome {
    match attempted.result {
        Err(err) => Outcome::Failed(ErrorRecord::from_protocol(
            &set.id,
            ItemKind::Set,
            &err,
            attempted.attempts,
        )),
        Ok(headers) => {
            let members: Vec<String> = headers.into_iter().map(|h| h.identifier).collect();
            Outcome::Harvested {
                id: set.id.clone(),
                document: doc(json!({
                    ID_FIELD: set.id,
                    "name": set.name,
                    "records": members,
                })),
            }
        }
    }
}

/// Writes outcomes and ledger transitions.
#[derive(Clone)]
pub struct OutcomeRouter {
    store: Arc<dyn DocumentStore>,
}

impl OutcomeRouter {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Persist `outcome` for an entry of the `kind` ledger and mark it done.
    ///
    /// Re-persisting an id overwrites its previous outcome, so an entry left
    /// pending by an interrupted run can be processed again safely.
    pub async fn persist(
        &self,
        namespace: &Namespace,
        kind: ItemKind,
        outcome: Outcome,
    ) -> Result<OutcomeKind, StoreError> {
        let outcome_kind = outcome.kind();
        let id = outcome.id().to_string();

        let (sink, document) = match (kind, outcome) {
            (ItemKind::Record, Outcome::Harvested { document, .. }) => {
                (namespace.records(), document)
            }
            (ItemKind::Record, Outcome::Deleted { id }) => {
                (namespace.deleted(), doc(json!({ ID_FIELD: id })))
            }
            (ItemKind::Set, Outcome::Harvested { document, .. }) => (namespace.sets(), document),
            (ItemKind::Set, Outcome::Deleted { .. }) => {
                return Err(StoreError::InvalidDocument {
                    collection: namespace.sets(),
                    message: format!("set {id} cannot be a deletion"),
                });
            }
            (_, Outcome::Failed(error)) => {
                let errors = namespace.errors();
                let document = error_document(&errors, &error)?;
                (errors, document)
            }
        };

        let mut ops = vec![WriteOp::UpsertOne {
            collection: sink.clone(),
            document,
        }];
        for sibling in sinks(namespace, kind) {
            if sibling == sink {
                continue;
            }
            let filter = if sibling == namespace.errors() {
                Filter::by_id(kind.error_key(&id))
            } else {
                Filter::by_id(id.as_str())
            };
            ops.push(WriteOp::DeleteMany {
                collection: sibling,
                filter,
            });
        }
        let ledger = match kind {
            ItemKind::Record => namespace.records_checkpoint(),
            ItemKind::Set => namespace.sets_checkpoint(),
        };
        ops.push(mark_done_op(ledger, &id));

        self.store.commit(namespace.database(), ops).await?;
        Ok(outcome_kind)
    }
}

fn sinks(namespace: &Namespace, kind: ItemKind) -> Vec<String> {
    match kind {
        ItemKind::Record => vec![namespace.records(), namespace.deleted(), namespace.errors()],
        ItemKind::Set => vec![namespace.sets(), namespace.errors()],
    }
}

fn error_document(collection: &str, error: &ErrorRecord) -> Result<Document, StoreError> {
    match serde_json::to_value(error) {
        Ok(Value::Object(mut map)) => {
            map.insert(ID_FIELD.to_string(), Value::String(error.key()));
            Ok(map)
        }
        Ok(_) => Err(StoreError::InvalidDocument {
            collection: collection.to_string(),
            message: "error record did not serialize to an object".to_string(),
        }),
        Err(e) => Err(StoreError::InvalidDocument {
            collection: collection.to_string(),
            message: e.to_string(),
        }),
    }
}
