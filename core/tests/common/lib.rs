//! Test doubles shared by the oxomo crates' integration tests.
//!
//! [`ScriptedAdapter`] replays a fixed repository: record ids in listing
//! order, each with a scripted `GetRecord` behaviour, plus sets and their
//! members. [`ScriptedConnector`] hands out adapters by base URL.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use oxomo_core::{
    AdapterConnector, HarvestOptions, Identify, MetadataMap, ProtocolAdapter, ProtocolError,
    Record, RecordHeader, RetryConfig, SetSpec, SqliteStore,
};
use tempfile::TempDir;

type ErrorFactory = Box<dyn Fn() -> ProtocolError + Send + Sync>;

enum RecordScript {
    Metadata(MetadataMap),
    Deleted,
    Fail(ErrorFactory),
    /// Fail with a retryable error for the first `failures` calls.
    Flaky { failures: u32, metadata: MetadataMap },
    Panic,
}

enum SetScript {
    Members(Vec<String>),
    Fail(ErrorFactory),
}

/// In-memory repository with scripted per-item behaviour.
pub struct ScriptedAdapter {
    base_url: String,
    records: Vec<(String, RecordScript)>,
    sets: Vec<(String, String, SetScript)>,
    fail_identify: bool,
    fail_list_sets: bool,
    latency: Option<Duration>,
    calls: Mutex<HashMap<String, u32>>,
    records_in_flight: AtomicUsize,
    max_records_in_flight: AtomicUsize,
    set_listing_overlapped_records: AtomicBool,
}

/// Counts one in-flight `GetRecord`; released on drop so panics unwind it.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedAdapter {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            records: Vec::new(),
            sets: Vec::new(),
            fail_identify: false,
            fail_list_sets: false,
            latency: None,
            calls: Mutex::new(HashMap::new()),
            records_in_flight: AtomicUsize::new(0),
            max_records_in_flight: AtomicUsize::new(0),
            set_listing_overlapped_records: AtomicBool::new(false),
        }
    }

    /// Record whose metadata is `title = [<id> title]`.
    pub fn with_record(self, id: &str) -> Self {
        let metadata = title_for(id);
        self.with_record_metadata(id, metadata)
    }

    pub fn with_record_metadata(mut self, id: &str, metadata: MetadataMap) -> Self {
        self.records
            .push((id.to_string(), RecordScript::Metadata(metadata)));
        self
    }

    pub fn with_deleted(mut self, id: &str) -> Self {
        self.records.push((id.to_string(), RecordScript::Deleted));
        self
    }

    pub fn with_failing_record(
        mut self,
        id: &str,
        error: impl Fn() -> ProtocolError + Send + Sync + 'static,
    ) -> Self {
        self.records
            .push((id.to_string(), RecordScript::Fail(Box::new(error))));
        self
    }

    pub fn with_flaky_record(mut self, id: &str, failures: u32) -> Self {
        self.records.push((
            id.to_string(),
            RecordScript::Flaky {
                failures,
                metadata: title_for(id),
            },
        ));
        self
    }

    pub fn with_panicking_record(mut self, id: &str) -> Self {
        self.records.push((id.to_string(), RecordScript::Panic));
        self
    }

    pub fn with_set(mut self, spec: &str, name: &str, members: &[&str]) -> Self {
        let members = members.iter().map(|m| (*m).to_string()).collect();
        self.sets.push((
            spec.to_string(),
            name.to_string(),
            SetScript::Members(members),
        ));
        self
    }

    pub fn with_failing_set(
        mut self,
        spec: &str,
        name: &str,
        error: impl Fn() -> ProtocolError + Send + Sync + 'static,
    ) -> Self {
        self.sets.push((
            spec.to_string(),
            name.to_string(),
            SetScript::Fail(Box::new(error)),
        ));
        self
    }

    pub fn failing_identify(mut self) -> Self {
        self.fail_identify = true;
        self
    }

    pub fn failing_list_sets(mut self) -> Self {
        self.fail_list_sets = true;
        self
    }

    /// Delay every `GetRecord` and per-set `ListIdentifiers` so calls overlap.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Highest number of `GetRecord` calls observed running at once.
    pub fn max_records_in_flight(&self) -> usize {
        self.max_records_in_flight.load(Ordering::SeqCst)
    }

    /// Whether a per-set listing started while a `GetRecord` was running.
    pub fn set_listing_overlapped_records(&self) -> bool {
        self.set_listing_overlapped_records.load(Ordering::SeqCst)
    }

    async fn pause(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    /// Number of `GetRecord` calls made for `id`.
    pub fn get_record_calls(&self, id: &str) -> u32 {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .copied()
            .unwrap_or(0)
    }

    /// Ids `GetRecord` was called for, sorted.
    pub fn fetched_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    fn bump(&self, id: &str) -> u32 {
        let mut calls = self.calls.lock().unwrap_or_else(PoisonError::into_inner);
        let count = calls.entry(id.to_string()).or_insert(0);
        *count += 1;
        *count
    }
}

#[async_trait]
impl ProtocolAdapter for ScriptedAdapter {
    async fn identify(&self) -> Result<Identify, ProtocolError> {
        if self.fail_identify {
            return Err(ProtocolError::transport("identify refused"));
        }
        Ok(Identify {
            repository_name: format!("Scripted repository at {}", self.base_url),
            admin_emails: vec!["admin@example.org".to_string()],
            base_url: self.base_url.clone(),
            protocol_version: "2.0".to_string(),
            earliest_datestamp: "2000-01-01T00:00:00Z".to_string(),
            granularity: "YYYY-MM-DDThh:mm:ssZ".to_string(),
        })
    }

    async fn list_identifiers(
        &self,
        _metadata_prefix: &str,
        set: Option<&str>,
    ) -> Result<Vec<RecordHeader>, ProtocolError> {
        let Some(spec) = set else {
            return Ok(self
                .records
                .iter()
                .map(|(id, script)| RecordHeader {
                    identifier: id.clone(),
                    deleted: matches!(script, RecordScript::Deleted),
                    ..RecordHeader::default()
                })
                .collect());
        };
        if self.records_in_flight.load(Ordering::SeqCst) > 0 {
            self.set_listing_overlapped_records
                .store(true, Ordering::SeqCst);
        }
        self.pause().await;
        match self.sets.iter().find(|(s, _, _)| s == spec) {
            Some((_, _, SetScript::Members(members))) => {
                Ok(members.iter().map(RecordHeader::new).collect())
            }
            Some((_, _, SetScript::Fail(error))) => Err(error()),
            None => Err(ProtocolError::oai("noRecordsMatch", format!("unknown set {spec}"))),
        }
    }

    async fn list_sets(&self) -> Result<Vec<SetSpec>, ProtocolError> {
        if self.fail_list_sets {
            return Err(ProtocolError::Http {
                status: 500,
                url: self.base_url.clone(),
            });
        }
        Ok(self
            .sets
            .iter()
            .map(|(spec, name, _)| SetSpec {
                spec: spec.clone(),
                name: name.clone(),
            })
            .collect())
    }

    async fn get_record(
        &self,
        identifier: &str,
        _metadata_prefix: &str,
    ) -> Result<Record, ProtocolError> {
        let call = self.bump(identifier);
        let running = self.records_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _in_flight = InFlight(&self.records_in_flight);
        self.max_records_in_flight
            .fetch_max(running, Ordering::SeqCst);
        self.pause().await;
        let Some((_, script)) = self.records.iter().find(|(id, _)| id == identifier) else {
            return Err(ProtocolError::oai("idDoesNotExist", identifier));
        };
        let header = RecordHeader::new(identifier);
        match script {
            RecordScript::Metadata(metadata) => Ok(Record {
                header,
                metadata: metadata.clone(),
            }),
            RecordScript::Deleted => Ok(Record {
                header: RecordHeader {
                    deleted: true,
                    ..header
                },
                metadata: MetadataMap::new(),
            }),
            RecordScript::Fail(error) => Err(error()),
            RecordScript::Flaky { failures, metadata } => {
                if call <= *failures {
                    Err(ProtocolError::Http {
                        status: 503,
                        url: self.base_url.clone(),
                    })
                } else {
                    Ok(Record {
                        header,
                        metadata: metadata.clone(),
                    })
                }
            }
            RecordScript::Panic => panic!("scripted panic for {identifier}"),
        }
    }
}

/// Connector over a fixed set of scripted adapters keyed by base URL.
#[derive(Default, Clone)]
pub struct ScriptedConnector {
    adapters: HashMap<String, Arc<ScriptedAdapter>>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, adapter: Arc<ScriptedAdapter>) -> Self {
        self.adapters.insert(adapter.base_url.clone(), adapter);
        self
    }
}

impl AdapterConnector for ScriptedConnector {
    fn connect(&self, base_url: &str) -> Result<Arc<dyn ProtocolAdapter>, ProtocolError> {
        match self.adapters.get(base_url) {
            Some(adapter) => Ok(Arc::clone(adapter) as Arc<dyn ProtocolAdapter>),
            None => Err(ProtocolError::transport(format!(
                "no scripted repository at {base_url}"
            ))),
        }
    }
}

/// Fresh SQLite store in a temp dir; keep the `TempDir` alive for the test.
pub fn temp_store() -> (TempDir, Arc<SqliteStore>) {
    let dir = TempDir::new().expect("tempdir");
    let store = SqliteStore::open(&dir.path().join("oxomo.db"), 8).expect("open store");
    (dir, Arc::new(store))
}

/// Harvest options with millisecond retry backoff.
pub fn fast_options(workers: usize) -> HarvestOptions {
    HarvestOptions {
        workers,
        retry: RetryConfig {
            max_retries: 2,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
        },
        progress_every: 1,
        ..HarvestOptions::default()
    }
}

/// Metadata map used by [`ScriptedAdapter::with_record`].
pub fn title_for(id: &str) -> MetadataMap {
    let mut metadata = MetadataMap::new();
    metadata.insert("title".to_string(), vec![format!("{id} title")]);
    metadata
}
