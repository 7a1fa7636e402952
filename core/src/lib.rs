//! Root of the `oxomo-core` library.
//!
//! Checkpointed harvesting engine: per-endpoint ledgers of pending work are
//! created once from remote listings, then drained by a bounded pool of
//! workers that persist each item's outcome together with its ledger
//! transition, so interrupted runs resume where they stopped.

// Library code reports through tracing only.
#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod adapter;
pub mod checkpoint;
pub mod config;
pub mod db;
pub mod errors;
pub mod harvest;
pub mod namespace;
pub mod retry;
pub mod store;

pub use adapter::{
    AdapterConnector, Identify, MetadataMap, ProtocolAdapter, Record, RecordHeader, SetSpec,
};
pub use checkpoint::{CheckpointStatus, CheckpointStore, IdentitySnapshot, LedgerCounts, PendingSet};
pub use config::{EndpointConfig, HarvestConfig, HttpConfig};
pub use errors::{ErrorCategory, HarvestError, ProtocolError, Result, StoreError};
pub use harvest::{
    EndpointOutcome, EndpointReport, HarvestOptions, HarvestReport, Harvester, PhaseReport,
    SkipCause,
};
pub use namespace::Namespace;
pub use retry::RetryConfig;
pub use store::{Document, DocumentStore, Filter, SqliteStore, WriteOp};
