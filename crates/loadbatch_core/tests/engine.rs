//! End-to-end tests for the loader.

use loadbatch_core::{
    decode_records, BackendError, FailedSegmentPolicy, FailureCause, LoadBackend, LoadReceipt,
    LoadRequest, Loader, LoaderConfig, LoaderError, MockBackend, PartitionKey, Row,
};
use loadbatch_storage::InMemoryProvider;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(10);

/// Fails loads for one table and accepts the rest.
struct SelectiveBackend {
    reject: String,
    loaded: Mutex<Vec<String>>,
}

impl LoadBackend for SelectiveBackend {
    fn load(&self, request: &LoadRequest) -> Result<LoadReceipt, BackendError> {
        if request.destination.secondary == self.reject {
            return Err(BackendError::fatal(format!(
                "table {} does not exist",
                request.destination
            )));
        }
        self.loaded.lock().push(request.segment.clone());
        Ok(LoadReceipt::default())
    }
}

fn config() -> LoaderConfig {
    LoaderConfig::new()
        .with_window(Duration::from_millis(100))
        .with_workers(1)
        .with_max_jobs(2)
        .with_buffer_size(64)
}

fn row(primary: &str, secondary: &str, data: Value) -> Row {
    Row::new(PartitionKey::new(primary, secondary), data)
}

fn payloads(request: &LoadRequest) -> Vec<Value> {
    decode_records(&request.content)
        .unwrap()
        .iter()
        .map(|line| serde_json::from_slice(line).unwrap())
        .collect()
}

#[test]
fn records_for_one_key_arrive_in_one_segment() {
    let backend = Arc::new(MockBackend::new());
    let provider = InMemoryProvider::new();
    let loader: Loader<Row> =
        Loader::with_provider(config(), backend.clone(), Arc::new(provider.clone())).unwrap();
    let successes = loader.successes();
    let failures = loader.failures();

    for n in 1..=3 {
        loader.submit(row("a", "b", json!({ "n": n }))).unwrap();
    }

    let result = successes.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(result.key, PartitionKey::new("a", "b"));
    assert_eq!(result.records, 3);
    assert!(result.size > 0);

    loader.close();
    assert!(successes.recv().is_err());
    assert_eq!(failures.try_iter().count(), 0);

    let requests = backend.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].size, result.size);
    assert_eq!(
        payloads(&requests[0]),
        vec![json!({ "n": 1 }), json!({ "n": 2 }), json!({ "n": 3 })]
    );
    assert!(loader.generation_store().is_empty());
    assert!(provider.names().is_empty());
}

#[test]
fn backend_errors_are_reported_per_segment() {
    let backend = Arc::new(MockBackend::failing("E"));
    let loader: Loader<Row> = Loader::with_provider(
        config(),
        backend.clone(),
        Arc::new(InMemoryProvider::new()),
    )
    .unwrap();
    let successes = loader.successes();
    let failures = loader.failures();

    loader.submit(row("a", "b", json!({ "n": 1 }))).unwrap();

    let failure = failures.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(failure.key, Some(PartitionKey::new("a", "b")));
    assert!(failure.size > 0);
    assert_eq!(
        failure.cause.backend_error(),
        Some(&BackendError::fatal("E"))
    );
    assert!(failure.cause.to_string().contains("E"));

    loader.close();
    assert_eq!(successes.try_iter().count(), 0);
    assert!(loader.generation_store().is_empty());
}

#[test]
fn close_before_first_tick_delivers_everything() {
    let backend = Arc::new(MockBackend::new());
    let config = config().with_window(Duration::from_secs(3600)).with_workers(3);
    let loader: Loader<Row> = Loader::with_provider(
        config,
        backend.clone(),
        Arc::new(InMemoryProvider::new()),
    )
    .unwrap();
    let successes = loader.successes();

    for n in 0..40 {
        let table = format!("t{}", n % 4);
        loader.submit(row("ds", &table, json!({ "n": n }))).unwrap();
    }
    loader.close();

    let results: Vec<_> = successes.iter().collect();
    assert_eq!(results.len(), 4);
    assert_eq!(results.iter().map(|r| r.records).sum::<u64>(), 40);
    assert!(results.iter().all(|r| r.generation == 0));
    assert_eq!(backend.request_count(), 4);
}

#[test]
fn concurrent_submissions_respect_max_jobs() {
    let backend = Arc::new(MockBackend::new().with_latency(Duration::from_millis(25)));
    let config = config()
        .with_window(Duration::from_secs(3600))
        .with_max_jobs(3)
        .with_workers(4);
    let loader: Loader<Row> = Loader::with_provider(
        config,
        backend.clone(),
        Arc::new(InMemoryProvider::new()),
    )
    .unwrap();
    let successes = loader.successes();

    for n in 0..24 {
        loader
            .submit(row("ds", &format!("t{n}"), json!({ "n": n })))
            .unwrap();
    }
    loader.close();

    assert_eq!(successes.iter().count(), 24);
    assert!(backend.peak_concurrency() <= 3);
    assert!(loader.gate().peak_in_flight() <= 3);
    assert_eq!(loader.gate().in_flight(), 0);
}

#[test]
fn one_failing_destination_does_not_block_others() {
    let backend = Arc::new(SelectiveBackend {
        reject: "missing".into(),
        loaded: Mutex::new(Vec::new()),
    });
    let provider = InMemoryProvider::new();
    let loader: Loader<Row> = Loader::with_provider(
        config().with_window(Duration::from_secs(3600)),
        backend.clone(),
        Arc::new(provider.clone()),
    )
    .unwrap();
    let successes = loader.successes();
    let failures = loader.failures();

    loader.submit(row("ds", "present", json!({ "ok": true }))).unwrap();
    loader.submit(row("ds", "missing", json!({ "ok": false }))).unwrap();
    loader.close();

    assert_eq!(successes.iter().count(), 1);
    let failures: Vec<_> = failures.iter().collect();
    assert_eq!(failures.len(), 1);
    assert!(matches!(failures[0].cause, FailureCause::Submit(_)));
    assert_eq!(backend.loaded.lock().len(), 1);

    // The failed segment stays in the spool for recovery.
    let retained = provider.names();
    assert_eq!(retained.len(), 1);
    assert!(retained[0].ends_with("-ds-missing"));
    let data = provider.data(&retained[0]).unwrap();
    assert_eq!(decode_records(&data).unwrap().len(), 1);
}

#[test]
fn discard_policy_removes_failed_segments() {
    let provider = InMemoryProvider::new();
    let config = config()
        .with_window(Duration::from_secs(3600))
        .with_failed_segments(FailedSegmentPolicy::Discard);
    let loader: Loader<Row> = Loader::with_provider(
        config,
        Arc::new(MockBackend::failing("nope")),
        Arc::new(provider.clone()),
    )
    .unwrap();
    let failures = loader.failures();

    loader.submit(row("a", "b", json!(1))).unwrap();
    loader.close();

    assert_eq!(failures.iter().count(), 1);
    assert!(provider.names().is_empty());
}

#[test]
fn segments_spool_to_files_under_the_configured_dir() {
    let dir = tempfile::tempdir().unwrap();
    let config = config()
        .with_window(Duration::from_secs(3600))
        .with_dir(dir.path().join("spool"));
    let loader: Loader<Row> =
        Loader::open(config, Arc::new(MockBackend::failing("offline"))).unwrap();
    let failures = loader.failures();

    loader.submit(row("a", "b", json!({ "x": 1 }))).unwrap();
    loader.close();

    let failure = failures.recv().unwrap();
    let name = failure.segment.unwrap();
    let path = dir.path().join("spool").join(&name);
    let data = std::fs::read(path).unwrap();
    assert_eq!(decode_records(&data).unwrap(), vec![br#"{"x":1}"#.to_vec()]);
}

#[test]
fn submit_after_close_is_rejected() {
    let loader: Loader<Row> = Loader::with_provider(
        config(),
        Arc::new(MockBackend::new()),
        Arc::new(InMemoryProvider::new()),
    )
    .unwrap();
    loader.close();

    let err = loader.submit(row("a", "b", json!(null))).unwrap_err();
    assert!(matches!(err, LoaderError::Closed));
}

#[test]
fn records_after_a_seal_land_in_the_next_generation() {
    let backend = Arc::new(MockBackend::new());
    let loader: Loader<Row> = Loader::with_provider(
        config().with_window(Duration::from_secs(3600)),
        backend.clone(),
        Arc::new(InMemoryProvider::new()),
    )
    .unwrap();
    let successes = loader.successes();

    loader.submit(row("a", "b", json!(1))).unwrap();
    while loader.generation_store().is_empty() {
        std::thread::sleep(Duration::from_millis(1));
    }
    let first = loader.seal_and_dispatch().unwrap();

    loader.submit(row("a", "b", json!(2))).unwrap();
    loader.close();

    let mut results: Vec<_> = successes.iter().collect();
    results.sort_by_key(|r| r.generation);
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].generation, first);
    assert!(results[1].generation > first);
    assert_ne!(results[0].segment, results[1].segment);
}

#[test]
fn dashed_keys_stay_apart_in_a_file_spool() {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(MockBackend::new());
    let config = config()
        .with_window(Duration::from_secs(3600))
        .with_dir(dir.path());
    let loader: Loader<Row> = Loader::open(config, backend.clone()).unwrap();
    let successes = loader.successes();
    let failures = loader.failures();

    loader.submit(row("a-b", "c", json!({ "k": "a-b/c" }))).unwrap();
    loader.submit(row("a", "b-c", json!({ "k": "a/b-c" }))).unwrap();
    loader.close();

    assert_eq!(successes.iter().count(), 2);
    assert_eq!(failures.iter().count(), 0);

    let requests = backend.requests();
    assert_eq!(requests.len(), 2);
    assert_ne!(requests[0].segment, requests[1].segment);
    for request in &requests {
        assert_eq!(
            payloads(request),
            vec![json!({ "k": request.destination.to_string() })]
        );
    }
}

#[test]
fn restart_leaves_retained_segments_alone() {
    let dir = tempfile::tempdir().unwrap();
    let config = config()
        .with_window(Duration::from_secs(3600))
        .with_dir(dir.path());

    let first: Loader<Row> =
        Loader::open(config.clone(), Arc::new(MockBackend::failing("offline"))).unwrap();
    let failures = first.failures();
    first.submit(row("a", "b", json!({ "n": 1 }))).unwrap();
    first.close();
    let retained = failures.recv().unwrap().segment.unwrap();

    let backend = Arc::new(MockBackend::new());
    let second: Loader<Row> = Loader::open(config, backend.clone()).unwrap();
    let successes = second.successes();
    second.submit(row("a", "b", json!({ "n": 2 }))).unwrap();
    second.close();

    let result = successes.recv().unwrap();
    assert_eq!(result.records, 1);
    assert_ne!(result.segment, retained);
    assert_eq!(payloads(&backend.requests()[0]), vec![json!({ "n": 2 })]);

    let data = std::fs::read(dir.path().join(&retained)).unwrap();
    assert_eq!(decode_records(&data).unwrap(), vec![br#"{"n":1}"#.to_vec()]);
}
