//! Checkpoint store
//!
//! A checkpoint is the durable harvest plan for one endpoint: an identity
//! snapshot plus two ledgers (records, sets) whose entries move from
//! `pending` to `done` exactly once per checkpoint epoch.
//!
//! Re-creating a checkpoint starts a new epoch: all three collections are
//! replaced in a single store transaction, after every remote listing has
//! been fetched.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::adapter::{Identify, ProtocolAdapter};
use crate::errors::{HarvestError, StoreError};
use crate::namespace::Namespace;
use crate::store::{Document, DocumentStore, Filter, ID_FIELD, WriteOp, doc, document_id};

/// `_id` of the single identity document.
pub const IDENTITY_ID: &str = "identity";

const STATUS_FIELD: &str = "status";

/// Ledger entry state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerStatus {
    Pending,
    Done,
}

impl LedgerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Done => "done",
        }
    }
}

/// Identify response captured when the checkpoint was created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentitySnapshot {
    pub repository_name: String,
    pub admin_emails: Vec<String>,
    pub base_url: String,
    pub protocol_version: String,
    pub earliest_datestamp: String,
    pub granularity: String,
    /// RFC 3339
    pub created_at: String,
}

impl IdentitySnapshot {
    fn from_identify(identify: Identify, created_at: String) -> Self {
        Self {
            repository_name: identify.repository_name,
            admin_emails: identify.admin_emails,
            base_url: identify.base_url,
            protocol_version: identify.protocol_version,
            earliest_datestamp: identify.earliest_datestamp,
            granularity: identify.granularity,
            created_at,
        }
    }
}

/// Pending set ledger entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSet {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LedgerCounts {
    pub pending: u64,
    pub done: u64,
}

impl LedgerCounts {
    pub fn total(&self) -> u64 {
        self.pending + self.done
    }
}

/// Summary used by `oxomo checkpoint status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckpointStatus {
    pub namespace: String,
    pub exists: bool,
    pub identity: Option<IdentitySnapshot>,
    pub records: LedgerCounts,
    pub sets: LedgerCounts,
}

/// Durable per-endpoint ledgers on top of a [`DocumentStore`].
#[derive(Clone)]
pub struct CheckpointStore {
    store: Arc<dyn DocumentStore>,
}

impl CheckpointStore {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// List everything the endpoint exposes and (re)write the checkpoint.
    ///
    /// Any remote failure aborts before the store is touched, leaving the
    /// previous checkpoint as it was.
    pub async fn create(
        &self,
        adapter: &dyn ProtocolAdapter,
        namespace: &Namespace,
        metadata_prefix: &str,
    ) -> Result<IdentitySnapshot, HarvestError> {
        let identify = adapter.identify().await?;
        let headers = adapter.list_identifiers(metadata_prefix, None).await?;
        let sets = adapter.list_sets().await?;

        let record_ids = dedup(
            namespace,
            "record",
            headers.into_iter().map(|h| h.identifier),
            Clone::clone,
        );
        let set_entries: Vec<Document> = dedup(namespace, "set", sets, |s| s.spec.clone())
            .into_iter()
            .map(|s| {
                doc(json!({
                    ID_FIELD: s.spec,
                    "name": s.name,
                    STATUS_FIELD: LedgerStatus::Pending.as_str(),
                }))
            })
            .collect();
        let record_entries: Vec<Document> = record_ids
            .into_iter()
            .map(|id| doc(json!({ID_FIELD: id, STATUS_FIELD: LedgerStatus::Pending.as_str()})))
            .collect();

        let snapshot = IdentitySnapshot::from_identify(identify, chrono::Utc::now().to_rfc3339());
        let mut identity_doc = match serde_json::to_value(&snapshot) {
            Ok(Value::Object(map)) => map,
            Ok(_) | Err(_) => {
                return Err(StoreError::InvalidDocument {
                    collection: namespace.identity(),
                    message: "identity snapshot did not serialize to an object".to_string(),
                }
                .into());
            }
        };
        identity_doc.insert(ID_FIELD.to_string(), Value::String(IDENTITY_ID.to_string()));

        let record_count = record_entries.len();
        let set_count = set_entries.len();
        let ops = vec![
            WriteOp::DropCollection {
                collection: namespace.identity(),
            },
            WriteOp::DropCollection {
                collection: namespace.records_checkpoint(),
            },
            WriteOp::DropCollection {
                collection: namespace.sets_checkpoint(),
            },
            WriteOp::InsertOne {
                collection: namespace.identity(),
                document: identity_doc,
            },
            WriteOp::CreateCollection {
                collection: namespace.records_checkpoint(),
            },
            WriteOp::InsertMany {
                collection: namespace.records_checkpoint(),
                documents: record_entries,
            },
            WriteOp::CreateCollection {
                collection: namespace.sets_checkpoint(),
            },
            WriteOp::InsertMany {
                collection: namespace.sets_checkpoint(),
                documents: set_entries,
            },
        ];
        self.store.commit(namespace.database(), ops).await?;

        tracing::info!(
            namespace = %namespace,
            repository = %snapshot.repository_name,
            records = record_count,
            sets = set_count,
            "checkpoint created"
        );
        Ok(snapshot)
    }

    /// True iff both ledger collections are present, even if empty.
    pub async fn exists(&self, namespace: &Namespace) -> Result<bool, StoreError> {
        let names = self.store.collection_names(namespace.database()).await?;
        let records = namespace.records_checkpoint();
        let sets = namespace.sets_checkpoint();
        Ok(names.contains(&records) && names.contains(&sets))
    }

    /// Remove identity and both ledgers. Idempotent.
    pub async fn drop(&self, namespace: &Namespace) -> Result<(), StoreError> {
        self.store
            .commit(
                namespace.database(),
                vec![
                    WriteOp::DropCollection {
                        collection: namespace.identity(),
                    },
                    WriteOp::DropCollection {
                        collection: namespace.records_checkpoint(),
                    },
                    WriteOp::DropCollection {
                        collection: namespace.sets_checkpoint(),
                    },
                ],
            )
            .await?;
        tracing::info!(namespace = %namespace, "checkpoint dropped");
        Ok(())
    }

    pub async fn mark_record_done(
        &self,
        namespace: &Namespace,
        id: &str,
    ) -> Result<(), StoreError> {
        self.store
            .commit(
                namespace.database(),
                vec![mark_done_op(namespace.records_checkpoint(), id)],
            )
            .await
    }

    pub async fn mark_set_done(&self, namespace: &Namespace, id: &str) -> Result<(), StoreError> {
        self.store
            .commit(
                namespace.database(),
                vec![mark_done_op(namespace.sets_checkpoint(), id)],
            )
            .await
    }

    /// Pending record ids in ledger order.
    pub async fn pending_records(&self, namespace: &Namespace) -> Result<Vec<String>, StoreError> {
        let docs = self
            .store
            .find(
                namespace.database(),
                &namespace.records_checkpoint(),
                &pending_filter(),
            )
            .await?;
        Ok(docs
            .iter()
            .filter_map(|d| document_id(d).map(str::to_string))
            .collect())
    }

    /// Pending set entries in ledger order.
    pub async fn pending_sets(&self, namespace: &Namespace) -> Result<Vec<PendingSet>, StoreError> {
        let docs = self
            .store
            .find(
                namespace.database(),
                &namespace.sets_checkpoint(),
                &pending_filter(),
            )
            .await?;
        Ok(docs
            .iter()
            .filter_map(|d| {
                let id = document_id(d)?;
                let name = d.get("name").and_then(Value::as_str).unwrap_or_default();
                Some(PendingSet {
                    id: id.to_string(),
                    name: name.to_string(),
                })
            })
            .collect())
    }

    pub async fn identity(
        &self,
        namespace: &Namespace,
    ) -> Result<Option<IdentitySnapshot>, StoreError> {
        let collection = namespace.identity();
        let docs = self
            .store
            .find(
                namespace.database(),
                &collection,
                &Filter::by_id(IDENTITY_ID),
            )
            .await?;
        let Some(document) = docs.into_iter().next() else {
            return Ok(None);
        };
        serde_json::from_value(Value::Object(document))
            .map(Some)
            .map_err(|e| StoreError::InvalidDocument {
                collection,
                message: e.to_string(),
            })
    }

    pub async fn status(&self, namespace: &Namespace) -> Result<CheckpointStatus, StoreError> {
        let exists = self.exists(namespace).await?;
        let identity = self.identity(namespace).await?;
        let records = self.counts(namespace, &namespace.records_checkpoint()).await?;
        let sets = self.counts(namespace, &namespace.sets_checkpoint()).await?;
        Ok(CheckpointStatus {
            namespace: namespace.to_string(),
            exists,
            identity,
            records,
            sets,
        })
    }

    async fn counts(
        &self,
        namespace: &Namespace,
        collection: &str,
    ) -> Result<LedgerCounts, StoreError> {
        let pending = self
            .store
            .count(namespace.database(), collection, &pending_filter())
            .await?;
        let done = self
            .store
            .count(
                namespace.database(),
                collection,
                &Filter::eq(STATUS_FIELD, LedgerStatus::Done.as_str()),
            )
            .await?;
        Ok(LedgerCounts { pending, done })
    }
}

/// Ledger transition `pending → done` for `id` in `collection`.
///
/// Matches only pending entries, so applying it to a done or absent entry
/// changes nothing.
pub(crate) fn mark_done_op(collection: String, id: &str) -> WriteOp {
    WriteOp::UpdateOne {
        collection,
        filter: Filter::by_id(id).and(STATUS_FIELD, LedgerStatus::Pending.as_str()),
        set: doc(json!({STATUS_FIELD: LedgerStatus::Done.as_str()})),
    }
}

fn pending_filter() -> Filter {
    Filter::eq(STATUS_FIELD, LedgerStatus::Pending.as_str())
}

/// Drop repeated ids, keeping the first occurrence.
fn dedup<T>(
    namespace: &Namespace,
    kind: &str,
    items: impl IntoIterator<Item = T>,
    key: impl Fn(&T) -> String,
) -> Vec<T> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    let mut repeated = 0usize;
    for item in items {
        if seen.insert(key(&item)) {
            out.push(item);
        } else {
            repeated += 1;
        }
    }
    if repeated > 0 {
        tracing::warn!(
            namespace = %namespace,
            kind,
            repeated,
            "listing repeated identifiers; kept first occurrence"
        );
    }
    out
}
