//! Remote repository interface.
//!
//! A [`ProtocolAdapter`] exposes the four OAI-PMH verbs the harvester needs.
//! Listings are returned fully materialized: an adapter either walks every
//! page or fails the whole call.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::ProtocolError;

/// Repository self-description returned by `Identify`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identify {
    pub repository_name: String,
    pub admin_emails: Vec<String>,
    pub base_url: String,
    pub protocol_version: String,
    pub earliest_datestamp: String,
    pub granularity: String,
}

/// Record header from `ListIdentifiers` / `GetRecord`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordHeader {
    pub identifier: String,
    pub datestamp: String,
    pub set_specs: Vec<String>,
    pub deleted: bool,
}

impl RecordHeader {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            ..Self::default()
        }
    }

    /// Tombstone flag (`status="deleted"`).
    pub fn is_deleted(&self) -> bool {
        self.deleted
    }
}

/// Set definition from `ListSets`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetSpec {
    pub spec: String,
    pub name: String,
}

/// Metadata element name → values, in document order per element.
pub type MetadataMap = BTreeMap<String, Vec<String>>;

/// A fetched record. `metadata` is empty for deletion tombstones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub header: RecordHeader,
    pub metadata: MetadataMap,
}

/// Client for one remote repository.
#[async_trait]
pub trait ProtocolAdapter: Send + Sync {
    async fn identify(&self) -> Result<Identify, ProtocolError>;

    /// Headers of every record, optionally restricted to one set.
    async fn list_identifiers(
        &self,
        metadata_prefix: &str,
        set: Option<&str>,
    ) -> Result<Vec<RecordHeader>, ProtocolError>;

    async fn list_sets(&self) -> Result<Vec<SetSpec>, ProtocolError>;

    async fn get_record(
        &self,
        identifier: &str,
        metadata_prefix: &str,
    ) -> Result<Record, ProtocolError>;
}

/// Binds a [`ProtocolAdapter`] to an endpoint base URL.
pub trait AdapterConnector: Send + Sync {
    fn connect(&self, base_url: &str) -> Result<Arc<dyn ProtocolAdapter>, ProtocolError>;
}
