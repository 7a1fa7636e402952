use std::sync::Arc;
use std::time::Duration;

use oxomo_core::store::doc;
use oxomo_core::{
    CheckpointStore, DocumentStore, EndpointConfig, EndpointOutcome, Filter, Harvester,
    LedgerCounts, Namespace, PhaseReport, ProtocolError, SkipCause,
};
use oxomo_test_support::{ScriptedAdapter, ScriptedConnector, fast_options, temp_store};
use pretty_assertions::assert_eq;
use serde_json::json;

const DB: &str = "dspace";
const URL: &str = "http://repo.test/oai";

fn endpoint(url: &str, collection: &str) -> EndpointConfig {
    EndpointConfig {
        url: url.to_string(),
        collection: collection.to_string(),
    }
}

fn scenario_adapter() -> ScriptedAdapter {
    ScriptedAdapter::new(URL)
        .with_record("A")
        .with_deleted("B")
        .with_failing_record("C", || ProtocolError::transport("connection reset"))
        .with_set("s1", "Set One", &["A", "B"])
}

struct Fixture {
    _dir: tempfile::TempDir,
    store: Arc<dyn DocumentStore>,
    harvester: Harvester,
    adapter: Arc<ScriptedAdapter>,
}

fn fixture(adapter: ScriptedAdapter, workers: usize) -> Fixture {
    let (dir, store) = temp_store();
    let store: Arc<dyn DocumentStore> = store;
    let adapter = Arc::new(adapter);
    let connector = ScriptedConnector::new().with(Arc::clone(&adapter));
    let harvester = Harvester::new(Arc::clone(&store), Arc::new(connector), fast_options(workers));
    Fixture {
        _dir: dir,
        store,
        harvester,
        adapter,
    }
}

async fn all_docs(store: &Arc<dyn DocumentStore>, collection: &str) -> Vec<serde_json::Value> {
    store
        .find(DB, collection, &Filter::all())
        .await
        .unwrap()
        .into_iter()
        .map(serde_json::Value::Object)
        .collect()
}

#[tokio::test]
async fn scenario_records_deletions_errors_and_sets() {
    let fx = fixture(scenario_adapter(), 4);
    let ep = endpoint(URL, "udea");
    let ns = Namespace::new(DB, "udea");

    fx.harvester.create_checkpoint(DB, &ep).await.unwrap();
    let report = fx.harvester.run(DB, &[ep]).await.unwrap();

    assert_eq!(
        report.endpoints[0].outcome,
        EndpointOutcome::Harvested {
            records: PhaseReport {
                total: 3,
                harvested: 1,
                deleted: 1,
                failed: 1,
                panicked: 0,
            },
            sets: PhaseReport {
                total: 1,
                harvested: 1,
                ..PhaseReport::default()
            },
        }
    );

    assert_eq!(
        all_docs(&fx.store, &ns.records()).await,
        vec![json!({"_id": "A", "title": ["A title"]})]
    );
    assert_eq!(all_docs(&fx.store, &ns.deleted()).await, vec![json!({"_id": "B"})]);
    assert_eq!(
        all_docs(&fx.store, &ns.sets()).await,
        vec![json!({"_id": "s1", "name": "Set One", "records": ["A", "B"]})]
    );

    let errors = all_docs(&fx.store, &ns.errors()).await;
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0]["_id"], "record:C");
    assert_eq!(errors[0]["id"], "C");
    assert_eq!(errors[0]["item_type"], "record");
    assert_eq!(errors[0]["error_class"], "transport");
    assert_eq!(errors[0]["retryable"], true);
    assert_eq!(errors[0]["attempts"], 3);

    let status = fx.harvester.checkpoints().status(&ns).await.unwrap();
    assert_eq!(status.records, LedgerCounts { pending: 0, done: 3 });
    assert_eq!(status.sets, LedgerCounts { pending: 0, done: 1 });
}

#[tokio::test]
async fn resume_processes_only_pending_entries() {
    let fx = fixture(scenario_adapter(), 2);
    let ep = endpoint(URL, "udea");
    let ns = Namespace::new(DB, "udea");

    fx.harvester.create_checkpoint(DB, &ep).await.unwrap();
    fx.harvester
        .checkpoints()
        .mark_record_done(&ns, "A")
        .await
        .unwrap();

    fx.harvester.run(DB, &[ep]).await.unwrap();

    assert_eq!(fx.adapter.fetched_ids(), vec!["B", "C"]);
    assert!(all_docs(&fx.store, &ns.records()).await.is_empty());
}

#[tokio::test]
async fn completed_checkpoint_does_no_remote_work() {
    let fx = fixture(ScriptedAdapter::new(URL).with_record("A"), 2);
    let ep = endpoint(URL, "udea");

    fx.harvester.create_checkpoint(DB, &ep).await.unwrap();
    fx.harvester.run(DB, std::slice::from_ref(&ep)).await.unwrap();
    fx.harvester.run(DB, &[ep]).await.unwrap();

    assert_eq!(fx.adapter.get_record_calls("A"), 1);
}

#[tokio::test]
async fn one_failure_does_not_affect_other_items() {
    let mut adapter = ScriptedAdapter::new(URL);
    for i in 0..40 {
        let id = format!("rec-{i:02}");
        adapter = if i == 17 {
            adapter.with_failing_record(&id, || ProtocolError::malformed("truncated body"))
        } else {
            adapter.with_record(&id)
        };
    }
    let fx = fixture(adapter, 8);
    let ep = endpoint(URL, "bulk");
    let ns = Namespace::new(DB, "bulk");

    fx.harvester.create_checkpoint(DB, &ep).await.unwrap();
    fx.harvester.run(DB, &[ep]).await.unwrap();

    assert_eq!(all_docs(&fx.store, &ns.records()).await.len(), 39);
    let errors = all_docs(&fx.store, &ns.errors()).await;
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0]["_id"], "record:rec-17");
    assert_eq!(errors[0]["retryable"], false);
    assert_eq!(errors[0]["attempts"], 1);
    assert_eq!(fx.adapter.get_record_calls("rec-17"), 1);

    let status = fx.harvester.checkpoints().status(&ns).await.unwrap();
    assert_eq!(status.records, LedgerCounts { pending: 0, done: 40 });
}

#[tokio::test]
async fn transient_failures_recover_within_retry_budget() {
    let fx = fixture(ScriptedAdapter::new(URL).with_flaky_record("F", 2), 1);
    let ep = endpoint(URL, "flaky");
    let ns = Namespace::new(DB, "flaky");

    fx.harvester.create_checkpoint(DB, &ep).await.unwrap();
    fx.harvester.run(DB, &[ep]).await.unwrap();

    assert_eq!(fx.adapter.get_record_calls("F"), 3);
    assert_eq!(all_docs(&fx.store, &ns.records()).await.len(), 1);
    assert!(all_docs(&fx.store, &ns.errors()).await.is_empty());
}

#[tokio::test]
async fn failed_set_listing_becomes_set_error() {
    let adapter = ScriptedAdapter::new(URL)
        .with_record("A")
        .with_failing_set("broken", "Broken Set", || ProtocolError::oai(
            "badArgument",
            "bad set",
        ));
    let fx = fixture(adapter, 2);
    let ep = endpoint(URL, "sets");
    let ns = Namespace::new(DB, "sets");

    fx.harvester.create_checkpoint(DB, &ep).await.unwrap();
    fx.harvester.run(DB, &[ep]).await.unwrap();

    let errors = all_docs(&fx.store, &ns.errors()).await;
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0]["_id"], "set:broken");
    assert_eq!(errors[0]["id"], "broken");
    assert_eq!(errors[0]["item_type"], "set");
    assert_eq!(errors[0]["error_class"], "oai:badArgument");
    assert!(all_docs(&fx.store, &ns.sets()).await.is_empty());
    assert!(
        fx.harvester
            .checkpoints()
            .pending_sets(&ns)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn panicking_unit_leaves_entry_pending() {
    let adapter = ScriptedAdapter::new(URL)
        .with_record("A")
        .with_panicking_record("P")
        .with_record("Z");
    let fx = fixture(adapter, 2);
    let ep = endpoint(URL, "panics");
    let ns = Namespace::new(DB, "panics");

    fx.harvester.create_checkpoint(DB, &ep).await.unwrap();
    let report = fx.harvester.run(DB, &[ep]).await.unwrap();

    let EndpointOutcome::Harvested { records, .. } = &report.endpoints[0].outcome else {
        panic!("endpoint should have been harvested");
    };
    assert_eq!(records.harvested, 2);
    assert_eq!(records.panicked, 1);
    assert_eq!(
        fx.harvester.checkpoints().pending_records(&ns).await.unwrap(),
        vec!["P"]
    );
}

#[tokio::test]
async fn missing_checkpoint_skips_only_that_endpoint() {
    let (dir, store) = temp_store();
    let store: Arc<dyn DocumentStore> = store;
    let first = Arc::new(ScriptedAdapter::new("http://one.test/oai").with_record("X"));
    let second = Arc::new(ScriptedAdapter::new("http://two.test/oai").with_record("Y"));
    let connector = ScriptedConnector::new()
        .with(Arc::clone(&first))
        .with(Arc::clone(&second));
    let harvester = Harvester::new(Arc::clone(&store), Arc::new(connector), fast_options(2));

    let endpoints = vec![
        endpoint("http://one.test/oai", "one"),
        endpoint("http://two.test/oai", "two"),
    ];
    harvester.create_checkpoint(DB, &endpoints[1]).await.unwrap();

    let report = harvester.run(DB, &endpoints).await.unwrap();
    assert!(report.has_skipped());
    assert!(matches!(
        report.endpoints[0].outcome,
        EndpointOutcome::Skipped {
            cause: SkipCause::MissingCheckpoint,
            ref reason,
        } if reason.contains("create it first")
    ));
    assert!(matches!(
        report.endpoints[1].outcome,
        EndpointOutcome::Harvested { .. }
    ));
    assert_eq!(first.get_record_calls("X"), 0);
    assert_eq!(second.get_record_calls("Y"), 1);
    drop(dir);
}

#[tokio::test]
async fn recreate_after_harvest_starts_new_epoch() {
    let fx = fixture(scenario_adapter(), 2);
    let ep = endpoint(URL, "udea");
    let ns = Namespace::new(DB, "udea");

    fx.harvester.create_checkpoint(DB, &ep).await.unwrap();
    fx.harvester.run(DB, std::slice::from_ref(&ep)).await.unwrap();
    fx.harvester.create_checkpoint(DB, &ep).await.unwrap();

    let status = fx.harvester.checkpoints().status(&ns).await.unwrap();
    assert_eq!(status.records, LedgerCounts { pending: 3, done: 0 });
    assert_eq!(status.sets, LedgerCounts { pending: 1, done: 0 });

    fx.harvester.run(DB, &[ep]).await.unwrap();
    // outcomes are overwritten, never duplicated
    assert_eq!(all_docs(&fx.store, &ns.records()).await.len(), 1);
    assert_eq!(all_docs(&fx.store, &ns.deleted()).await.len(), 1);
    assert_eq!(all_docs(&fx.store, &ns.errors()).await.len(), 1);
}

#[tokio::test]
async fn outcome_moves_between_sinks_across_epochs() {
    let (dir, store) = temp_store();
    let store: Arc<dyn DocumentStore> = store;
    let ns = Namespace::new(DB, "moves");

    // A stale deletion marker from an earlier epoch
    store
        .insert_one(DB, &ns.deleted(), doc(json!({"_id": "A"})))
        .await
        .unwrap();

    let adapter = Arc::new(ScriptedAdapter::new(URL).with_record("A"));
    let connector = ScriptedConnector::new().with(Arc::clone(&adapter));
    let harvester = Harvester::new(Arc::clone(&store), Arc::new(connector), fast_options(1));
    let ep = endpoint(URL, "moves");
    harvester.create_checkpoint(DB, &ep).await.unwrap();
    harvester.run(DB, &[ep]).await.unwrap();

    assert!(all_docs(&store, &ns.deleted()).await.is_empty());
    assert_eq!(all_docs(&store, &ns.records()).await.len(), 1);

    let checkpoints = CheckpointStore::new(Arc::clone(&store));
    assert!(checkpoints.pending_records(&ns).await.unwrap().is_empty());
    drop(dir);
}

#[tokio::test]
async fn record_and_set_failures_sharing_an_id_both_keep_an_error() {
    let adapter = ScriptedAdapter::new(URL)
        .with_failing_record("X", || ProtocolError::malformed("bad record"))
        .with_failing_set("X", "Set X", || ProtocolError::transport("listing refused"));
    let fx = fixture(adapter, 2);
    let ep = endpoint(URL, "shared");
    let ns = Namespace::new(DB, "shared");

    fx.harvester.create_checkpoint(DB, &ep).await.unwrap();
    fx.harvester.run(DB, &[ep]).await.unwrap();

    let errors = all_docs(&fx.store, &ns.errors()).await;
    let keyed: Vec<(&str, &str)> = errors
        .iter()
        .map(|e| (e["_id"].as_str().unwrap(), e["item_type"].as_str().unwrap()))
        .collect();
    assert_eq!(keyed, vec![("record:X", "record"), ("set:X", "set")]);
    assert!(errors.iter().all(|e| e["id"] == "X"));

    let status = fx.harvester.checkpoints().status(&ns).await.unwrap();
    assert_eq!(status.records, LedgerCounts { pending: 0, done: 1 });
    assert_eq!(status.sets, LedgerCounts { pending: 0, done: 1 });
}

#[tokio::test]
async fn record_fetches_never_exceed_worker_count() {
    let mut adapter = ScriptedAdapter::new(URL).with_latency(Duration::from_millis(5));
    for i in 0..24 {
        adapter = adapter.with_record(&format!("rec-{i}"));
    }
    let fx = fixture(adapter, 3);
    let ep = endpoint(URL, "bounded");

    fx.harvester.create_checkpoint(DB, &ep).await.unwrap();
    fx.harvester.run(DB, &[ep]).await.unwrap();

    let peak = fx.adapter.max_records_in_flight();
    assert!(peak <= 3, "{peak} GetRecord calls ran at once with 3 workers");
    assert!(peak > 1, "records were fetched one at a time");
    assert_eq!(fx.adapter.fetched_ids().len(), 24);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn set_phase_starts_after_record_phase_drains() {
    let mut adapter = ScriptedAdapter::new(URL).with_latency(Duration::from_millis(5));
    for i in 0..12 {
        adapter = adapter.with_record(&format!("rec-{i}"));
    }
    let adapter = adapter
        .with_set("s1", "Set One", &["rec-0", "rec-1"])
        .with_set("s2", "Set Two", &["rec-2"]);
    let fx = fixture(adapter, 4);
    let ep = endpoint(URL, "barrier");
    let ns = Namespace::new(DB, "barrier");

    fx.harvester.create_checkpoint(DB, &ep).await.unwrap();
    fx.harvester.run(DB, &[ep]).await.unwrap();

    assert!(!fx.adapter.set_listing_overlapped_records());
    assert_eq!(all_docs(&fx.store, &ns.sets()).await.len(), 2);
}

#[tokio::test]
async fn unreachable_endpoint_is_skipped_with_its_cause() {
    let (dir, store) = temp_store();
    let store: Arc<dyn DocumentStore> = store;
    let ep = endpoint(URL, "gone");

    let adapter = Arc::new(ScriptedAdapter::new(URL).with_record("A"));
    let connector = ScriptedConnector::new().with(adapter);
    Harvester::new(Arc::clone(&store), Arc::new(connector), fast_options(1))
        .create_checkpoint(DB, &ep)
        .await
        .unwrap();

    // same store, but nothing answers at URL any more
    let harvester = Harvester::new(
        Arc::clone(&store),
        Arc::new(ScriptedConnector::new()),
        fast_options(1),
    );
    let report = harvester.run(DB, &[ep]).await.unwrap();
    assert!(matches!(
        report.endpoints[0].outcome,
        EndpointOutcome::Skipped {
            cause: SkipCause::Unreachable,
            ..
        }
    ));

    let status = harvester
        .checkpoints()
        .status(&Namespace::new(DB, "gone"))
        .await
        .unwrap();
    assert_eq!(status.records, LedgerCounts { pending: 1, done: 0 });
    drop(dir);
}
