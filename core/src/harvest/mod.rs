//! Harvest orchestration
//!
//! For each endpoint, in configuration order:
//! 1. require an existing checkpoint (otherwise the endpoint is skipped)
//! 2. process every pending record on a bounded worker pool
//! 3. after the record phase drains, process every pending set the same way
//!
//! Per-item protocol failures become error records. A store failure aborts
//! the phase and the run. A panicking unit is logged and leaves its entry
//! pending for the next run.

mod outcome;
mod progress;

pub use outcome::{
    ErrorRecord, ItemKind, Outcome, OutcomeKind, OutcomeRouter, classify_record, classify_set,
};
pub use progress::{Phase, PhaseReport};

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};

use crate::adapter::{AdapterConnector, ProtocolAdapter};
use crate::checkpoint::{CheckpointStore, IdentitySnapshot, PendingSet};
use crate::config::EndpointConfig;
use crate::errors::{HarvestError, StoreError};
use crate::namespace::Namespace;
use crate::retry::{RetryConfig, fetch_with_retry};
use crate::store::DocumentStore;
use progress::Progress;

/// Worker-pool size used when none is configured.
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1)
}

#[derive(Debug, Clone)]
pub struct HarvestOptions {
    /// Maximum in-flight units per phase
    pub workers: usize,
    pub metadata_prefix: String,
    pub retry: RetryConfig,
    /// Log progress every N completed units (0 disables)
    pub progress_every: usize,
}

impl Default for HarvestOptions {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            metadata_prefix: "oai_dc".to_string(),
            retry: RetryConfig::default(),
            progress_every: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EndpointOutcome {
    Harvested {
        records: PhaseReport,
        sets: PhaseReport,
    },
    Skipped {
        cause: SkipCause,
        reason: String,
    },
}

/// Why an endpoint was left out of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipCause {
    /// No checkpoint has been created for the endpoint.
    MissingCheckpoint,
    /// The endpoint's adapter could not be built.
    Unreachable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointReport {
    pub url: String,
    pub namespace: String,
    pub outcome: EndpointOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HarvestReport {
    pub endpoints: Vec<EndpointReport>,
}

impl HarvestReport {
    pub fn skipped(&self) -> impl Iterator<Item = &EndpointReport> {
        self.endpoints
            .iter()
            .filter(|e| matches!(e.outcome, EndpointOutcome::Skipped { .. }))
    }

    pub fn has_skipped(&self) -> bool {
        self.skipped().next().is_some()
    }
}

/// Drives checkpoint creation and harvest runs.
pub struct Harvester {
    checkpoints: CheckpointStore,
    router: OutcomeRouter,
    connector: Arc<dyn AdapterConnector>,
    options: HarvestOptions,
}

impl Harvester {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        connector: Arc<dyn AdapterConnector>,
        options: HarvestOptions,
    ) -> Self {
        Self {
            checkpoints: CheckpointStore::new(Arc::clone(&store)),
            router: OutcomeRouter::new(store),
            connector,
            options,
        }
    }

    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.checkpoints
    }

    /// Build (or rebuild) the checkpoint for `endpoint`.
    pub async fn create_checkpoint(
        &self,
        database: &str,
        endpoint: &EndpointConfig,
    ) -> Result<IdentitySnapshot, HarvestError> {
        let namespace = Namespace::new(database, &endpoint.collection);
        let adapter = self.connector.connect(&endpoint.url)?;
        self.checkpoints
            .create(adapter.as_ref(), &namespace, &self.options.metadata_prefix)
            .await
    }

    /// Harvest every endpoint in order.
    ///
    /// Endpoints without a checkpoint are reported as skipped; only store
    /// failures end the run early.
    pub async fn run(
        &self,
        database: &str,
        endpoints: &[EndpointConfig],
    ) -> Result<HarvestReport, HarvestError> {
        let mut report = HarvestReport::default();
        for endpoint in endpoints {
            let namespace = Namespace::new(database, &endpoint.collection);
            let outcome = match self.harvest_endpoint(&namespace, endpoint).await {
                Ok((records, sets)) => EndpointOutcome::Harvested { records, sets },
                Err(err @ HarvestError::Precondition { .. }) => {
                    tracing::warn!(
                        endpoint = %endpoint.url,
                        namespace = %namespace,
                        category = err.category().as_str(),
                        "checkpoint for {} not found, create it first",
                        endpoint.url
                    );
                    EndpointOutcome::Skipped {
                        cause: SkipCause::MissingCheckpoint,
                        reason: err.to_string(),
                    }
                }
                Err(HarvestError::Protocol(err)) => {
                    tracing::error!(
                        endpoint = %endpoint.url,
                        error = %err,
                        "cannot reach endpoint"
                    );
                    EndpointOutcome::Skipped {
                        cause: SkipCause::Unreachable,
                        reason: err.to_string(),
                    }
                }
                Err(err) => return Err(err),
            };
            report.endpoints.push(EndpointReport {
                url: endpoint.url.clone(),
                namespace: namespace.to_string(),
                outcome,
            });
        }
        Ok(report)
    }

    async fn harvest_endpoint(
        &self,
        namespace: &Namespace,
        endpoint: &EndpointConfig,
    ) -> Result<(PhaseReport, PhaseReport), HarvestError> {
        if !self.checkpoints.exists(namespace).await? {
            return Err(HarvestError::Precondition {
                namespace: namespace.to_string(),
            });
        }
        let adapter = self.connector.connect(&endpoint.url)?;
        let worker = Worker {
            adapter,
            router: self.router.clone(),
            namespace: namespace.clone(),
            metadata_prefix: Arc::from(self.options.metadata_prefix.as_str()),
            retry: self.options.retry.clone(),
        };

        let records = self.checkpoints.pending_records(namespace).await?;
        let records = self
            .run_phase(
                &worker,
                Phase::Records,
                records.into_iter().map(WorkItem::Record).collect(),
            )
            .await?;

        let sets = self.checkpoints.pending_sets(namespace).await?;
        let sets = self
            .run_phase(&worker, Phase::Sets, sets.into_iter().map(WorkItem::Set).collect())
            .await?;

        Ok((records, sets))
    }

    async fn run_phase(
        &self,
        worker: &Worker,
        phase: Phase,
        items: Vec<WorkItem>,
    ) -> Result<PhaseReport, StoreError> {
        let mut progress = Progress::new(
            worker.namespace.to_string(),
            phase,
            items.len(),
            self.options.progress_every,
        );
        let semaphore = Arc::new(Semaphore::new(self.options.workers.max(1)));
        let mut tasks = JoinSet::new();

        for item in items {
            while let Some(joined) = tasks.try_join_next() {
                absorb(joined, &mut progress, &mut tasks)?;
            }
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };
            let worker = worker.clone();
            tasks.spawn(async move {
                let _permit = permit;
                worker.process(item).await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            absorb(joined, &mut progress, &mut tasks)?;
        }
        Ok(progress.finish())
    }
}

fn absorb(
    joined: Result<Result<OutcomeKind, StoreError>, JoinError>,
    progress: &mut Progress,
    tasks: &mut JoinSet<Result<OutcomeKind, StoreError>>,
) -> Result<(), StoreError> {
    match joined {
        Ok(Ok(kind)) => progress.record(kind),
        Ok(Err(err)) => {
            tasks.abort_all();
            tracing::error!(error = %err, "store failure; aborting phase");
            return Err(err);
        }
        Err(err) if err.is_panic() => {
            progress.panicked();
            tracing::error!(error = %err, "harvest unit panicked; entry left pending");
        }
        Err(_) => {}
    }
    Ok(())
}

enum WorkItem {
    Record(String),
    Set(PendingSet),
}

/// Everything one unit needs; cloned into each spawned task.
#[derive(Clone)]
struct Worker {
    adapter: Arc<dyn ProtocolAdapter>,
    router: OutcomeRouter,
    namespace: Namespace,
    metadata_prefix: Arc<str>,
    retry: RetryConfig,
}

impl Worker {
    async fn process(&self, item: WorkItem) -> Result<OutcomeKind, StoreError> {
        let adapter = &self.adapter;
        let prefix: &str = &self.metadata_prefix;
        let (kind, outcome) = match item {
            WorkItem::Record(id) => {
                let identifier = id.as_str();
                let attempted =
                    fetch_with_retry(&self.retry, move || adapter.get_record(identifier, prefix))
                        .await;
                (ItemKind::Record, classify_record(&id, attempted))
            }
            WorkItem::Set(set) => {
                let spec = set.id.as_str();
                let attempted = fetch_with_retry(&self.retry, move || {
                    adapter.list_identifiers(prefix, Some(spec))
                })
                .await;
                (ItemKind::Set, classify_set(&set, attempted))
            }
        };

        if let Outcome::Failed(error) = &outcome {
            tracing::warn!(
                namespace = %self.namespace,
                item_type = kind.as_str(),
                id = %error.id,
                error_class = %error.error_class,
                attempts = error.attempts,
                "{}",
                error.message
            );
        }
        self.router.persist(&self.namespace, kind, outcome).await
    }
}
