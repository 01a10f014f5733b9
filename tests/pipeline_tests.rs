//! End-to-end runs of the ingestion pipeline against an in-memory object
//! store and sink.

use flate2::{write::GzEncoder, Compression};
use futures::stream::{self, BoxStream, StreamExt};
use logship::batch::BatchLimits;
use logship::config::types::{Granularity, TimeoutConfig};
use logship::pipeline::{
    Collaborators, IngestionPipeline, PipelineError, PipelineSettings, RetryPolicy,
};
use logship::router::FixedClock;
use logship::sink::{FileSink, LogSink, MemorySink, SinkError, UploadFailure};
use logship::source::lines::GzipOrPlain;
use logship::source::store::{ListError, ObjectLister, ObjectStoreSource};
use logship::source::timestamp::TimestampResolver;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// 2024-09-03T00:00:01.123Z, day 19969 since the epoch
const NOW_MILLIS: i64 = 1_725_321_601_123;
const GROUP: &str = "/aws/alb/test";
const STREAM: &str = "log_stream-19969";

fn gzip(text: &str) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(text.as_bytes()).unwrap();
    encoder.finish().unwrap()
}

async fn store_with(objects: Vec<(&str, Vec<u8>)>) -> Arc<ObjectStoreSource> {
    let store = InMemory::new();
    for (key, payload) in objects {
        store
            .put(&Path::from(key), PutPayload::from(payload))
            .await
            .unwrap();
    }
    Arc::new(ObjectStoreSource::new(Arc::new(store)))
}

fn settings() -> PipelineSettings {
    PipelineSettings {
        prefix: "logs".to_string(),
        log_group: GROUP.to_string(),
        stream_prefix: "log_stream".to_string(),
        limits: BatchLimits::default(),
        retry: RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
        },
        timeouts: TimeoutConfig::default(),
        workers: 1,
    }
}

fn pipeline_with(
    lister: Arc<dyn ObjectLister>,
    source: Arc<ObjectStoreSource>,
    sink: Arc<dyn LogSink>,
    settings: PipelineSettings,
) -> IngestionPipeline {
    let clock = Arc::new(FixedClock::from_millis(NOW_MILLIS));
    IngestionPipeline::new(
        Collaborators {
            lister,
            fetcher: source,
            lines: Arc::new(GzipOrPlain),
            sink,
        },
        settings,
        TimestampResolver::ingestion_time(clock),
        Granularity::Daily,
    )
}

fn pipeline(
    source: Arc<ObjectStoreSource>,
    sink: Arc<dyn LogSink>,
    settings: PipelineSettings,
) -> IngestionPipeline {
    pipeline_with(source.clone(), source, sink, settings)
}

/// Lists a fixed set of results, whether or not the objects exist.
struct ScriptedLister(Vec<Result<String, String>>);

impl ObjectLister for ScriptedLister {
    fn list<'a>(&'a self, _prefix: &'a str) -> BoxStream<'a, Result<String, ListError>> {
        stream::iter(
            self.0
                .iter()
                .map(|entry| entry.clone().map_err(ListError::Other)),
        )
        .boxed()
    }
}

/// Hands out keys one page at a time.
struct PagedLister(Vec<Vec<String>>);

impl ObjectLister for PagedLister {
    fn list<'a>(&'a self, _prefix: &'a str) -> BoxStream<'a, Result<String, ListError>> {
        stream::iter(&self.0)
            .flat_map(|page| stream::iter(page.iter().cloned().map(Ok)))
            .boxed()
    }
}

#[tokio::test]
async fn test_gzip_and_plain_objects_land_in_one_daily_stream() {
    let source = store_with(vec![
        ("logs/a.log.gz", gzip("a1\na2\n")),
        ("logs/b.log", b"b1\nb2\nb3".to_vec()),
    ])
    .await;
    let sink = Arc::new(MemorySink::new());

    let report = pipeline(source, sink.clone(), settings())
        .run(CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.listed_objects, 2);
    assert_eq!(report.processed_objects, 2);
    assert_eq!(report.failed_objects, 0);
    assert_eq!(report.uploaded_batches, 2);
    assert_eq!(report.uploaded_events, 5);
    assert!(!report.is_degraded());

    assert_eq!(sink.groups(), vec![GROUP.to_string()]);
    assert_eq!(sink.streams(), vec![STREAM.to_string()]);
    assert_eq!(sink.ensure_stream_calls(), 1);

    let messages = sink.messages_by_stream();
    assert_eq!(messages[STREAM], vec!["a1", "a2", "b1", "b2", "b3"]);

    let received = sink.received();
    assert!(received
        .iter()
        .flat_map(|batch| &batch.events)
        .all(|event| event.timestamp == NOW_MILLIS));
}

#[tokio::test]
async fn test_objects_outside_prefix_are_ignored() {
    let source = store_with(vec![
        ("logs/a.log", b"inside".to_vec()),
        ("other/b.log", b"outside".to_vec()),
    ])
    .await;
    let sink = Arc::new(MemorySink::new());

    let report = pipeline(source, sink.clone(), settings())
        .run(CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.listed_objects, 1);
    assert_eq!(sink.messages_by_stream()[STREAM], vec!["inside"]);
}

#[tokio::test]
async fn test_empty_object_creates_no_stream() {
    let source = store_with(vec![("logs/empty.log", Vec::new())]).await;
    let sink = Arc::new(MemorySink::new());

    let report = pipeline(source, sink.clone(), settings())
        .run(CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.processed_objects, 1);
    assert_eq!(report.uploaded_batches, 0);
    assert!(sink.streams().is_empty());
    assert_eq!(sink.put_calls(), 0);
}

#[tokio::test]
async fn test_missing_object_is_skipped() {
    let source = store_with(vec![("logs/present.log", b"here".to_vec())]).await;
    let lister = Arc::new(ScriptedLister(vec![
        Ok("logs/gone.log".to_string()),
        Ok("logs/present.log".to_string()),
    ]));
    let sink = Arc::new(MemorySink::new());

    let report = pipeline_with(lister, source, sink.clone(), settings())
        .run(CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.listed_objects, 2);
    assert_eq!(report.failed_objects, 1);
    assert_eq!(report.processed_objects, 1);
    assert!(report.is_degraded());
    assert_eq!(sink.messages_by_stream()[STREAM], vec!["here"]);
}

#[tokio::test]
async fn test_large_objects_are_split_into_batches() {
    let text: String = (0..25).map(|i| format!("line {}\n", i)).collect();
    let source = store_with(vec![("logs/big.log", text.into_bytes())]).await;
    let sink = Arc::new(MemorySink::new());
    let mut settings = settings();
    settings.limits.max_count = Some(10);

    let report = pipeline(source, sink.clone(), settings)
        .run(CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.uploaded_batches, 3);
    let sizes: Vec<usize> = sink.received().iter().map(|b| b.events.len()).collect();
    assert_eq!(sizes, vec![10, 10, 5]);

    let by_stream = sink.messages_by_stream();
    let messages = &by_stream[STREAM];
    assert_eq!(messages.len(), 25);
    assert_eq!(messages[0], "line 0");
    assert_eq!(messages[24], "line 24");
}

#[tokio::test]
async fn test_oversized_event_fails_alone() {
    let big = "x".repeat(200);
    let text = format!("small1\n{}\nsmall2\n", big);
    let source = store_with(vec![("logs/mixed.log", text.into_bytes())]).await;
    let sink = Arc::new(MemorySink::new());
    sink.reject_batches_over(100);
    let mut settings = settings();
    settings.limits.max_bytes = 100;

    let report = pipeline(source, sink.clone(), settings)
        .run(CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.uploaded_batches, 2);
    assert_eq!(report.failed_batches, 1);
    assert_eq!(report.failed_objects, 1);
    assert_eq!(sink.messages_by_stream()[STREAM], vec!["small1", "small2"]);
}

#[tokio::test]
async fn test_throttled_upload_is_retried() {
    let source = store_with(vec![("logs/a.log", b"one\ntwo".to_vec())]).await;
    let sink = Arc::new(MemorySink::new());
    sink.push_upload_failures([UploadFailure::Throttled, UploadFailure::Throttled]);

    let report = pipeline(source, sink.clone(), settings())
        .run(CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.processed_objects, 1);
    assert_eq!(report.failed_batches, 0);
    assert_eq!(sink.put_calls(), 3);
    assert_eq!(sink.messages_by_stream()[STREAM], vec!["one", "two"]);
}

#[tokio::test]
async fn test_permanent_upload_failure_moves_on() {
    let source = store_with(vec![
        ("logs/a.log", b"first".to_vec()),
        ("logs/b.log", b"second".to_vec()),
    ])
    .await;
    let sink = Arc::new(MemorySink::new());
    sink.push_upload_failures([UploadFailure::Rejected("bad batch".to_string())]);

    let report = pipeline(source, sink.clone(), settings())
        .run(CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.failed_objects, 1);
    assert_eq!(report.processed_objects, 1);
    assert_eq!(sink.put_calls(), 2);
    assert_eq!(sink.messages_by_stream()[STREAM], vec!["second"]);
}

#[tokio::test]
async fn test_listing_error_is_fatal() {
    let source = store_with(vec![("logs/a.log", b"line".to_vec())]).await;
    let lister = Arc::new(ScriptedLister(vec![Err("access denied".to_string())]));
    let sink = Arc::new(MemorySink::new());

    let err = pipeline_with(lister, source, sink.clone(), settings())
        .run(CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Listing(_)));
    assert_eq!(sink.put_calls(), 0);
}

#[tokio::test]
async fn test_listing_error_waits_for_in_flight_objects() {
    let source = store_with(vec![("logs/a.log", b"line".to_vec())]).await;
    let lister = Arc::new(ScriptedLister(vec![
        Ok("logs/a.log".to_string()),
        Err("page 2 failed".to_string()),
    ]));
    let sink = Arc::new(MemorySink::new());
    let mut settings = settings();
    settings.workers = 2;

    let err = pipeline_with(lister, source, sink.clone(), settings)
        .run(CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Listing(_)));
    assert_eq!(sink.messages_by_stream()[STREAM], vec!["line"]);
}

#[tokio::test]
async fn test_every_listing_page_is_processed() {
    let keys: Vec<String> = (0..7).map(|i| format!("logs/{}.log", i)).collect();
    let source = store_with(
        keys.iter()
            .map(|key| (key.as_str(), key.clone().into_bytes()))
            .collect(),
    )
    .await;
    let pages: Vec<Vec<String>> = keys.chunks(3).map(|page| page.to_vec()).collect();
    assert_eq!(pages.len(), 3);
    let sink = Arc::new(MemorySink::new());
    let mut settings = settings();
    settings.workers = 2;

    let report = pipeline_with(Arc::new(PagedLister(pages)), source, sink.clone(), settings)
        .run(CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.listed_objects, 7);
    assert_eq!(report.processed_objects, 7);
    let mut messages = sink.messages_by_stream()[STREAM].clone();
    messages.sort();
    assert_eq!(messages, keys);
}

#[tokio::test]
async fn test_group_provision_failure_is_fatal() {
    let source = store_with(vec![("logs/a.log", b"line".to_vec())]).await;
    let sink = Arc::new(MemorySink::new());
    sink.fail_next_ensure_group(SinkError::Rejected("not allowed".to_string()));

    let err = pipeline(source, sink.clone(), settings())
        .run(CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        PipelineError::GroupProvision { group, .. } => assert_eq!(group, GROUP),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(sink.put_calls(), 0);
}

#[tokio::test]
async fn test_stream_provision_failure_is_retried_by_next_batch() {
    let source = store_with(vec![
        ("logs/a.log", b"first".to_vec()),
        ("logs/b.log", b"second".to_vec()),
    ])
    .await;
    let sink = Arc::new(MemorySink::new());
    sink.fail_next_ensure_stream(SinkError::Transport("connection reset".to_string()));

    let report = pipeline(source, sink.clone(), settings())
        .run(CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.failed_objects, 1);
    assert_eq!(report.processed_objects, 1);
    assert_eq!(sink.ensure_stream_calls(), 2);
    assert_eq!(sink.messages_by_stream()[STREAM], vec!["second"]);
}

#[tokio::test]
async fn test_parallel_objects_never_overlap_on_a_stream() {
    let objects: Vec<(String, Vec<u8>)> = (0..6)
        .map(|i| {
            let text: String = (0..4).map(|j| format!("obj{} line{}\n", i, j)).collect();
            (format!("logs/{}.log", i), text.into_bytes())
        })
        .collect();
    let source = store_with(
        objects
            .iter()
            .map(|(key, payload)| (key.as_str(), payload.clone()))
            .collect(),
    )
    .await;
    let sink = Arc::new(MemorySink::with_upload_delay(Duration::from_millis(10)));
    let mut settings = settings();
    settings.workers = 4;
    settings.limits.max_count = Some(2);

    let report = pipeline(source, sink.clone(), settings)
        .run(CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.processed_objects, 6);
    assert_eq!(report.uploaded_batches, 12);
    assert_eq!(report.uploaded_events, 24);
    assert_eq!(sink.max_in_flight_per_stream(), 1);
    assert_eq!(sink.ensure_stream_calls(), 1);

    // Lines of one object keep their order even when objects interleave
    let by_stream = sink.messages_by_stream();
    let messages = &by_stream[STREAM];
    for i in 0..6 {
        let lines: Vec<&String> = messages
            .iter()
            .filter(|m| m.starts_with(&format!("obj{} ", i)))
            .collect();
        let expected: Vec<String> = (0..4).map(|j| format!("obj{} line{}", i, j)).collect();
        assert_eq!(lines, expected.iter().collect::<Vec<_>>());
    }
}

#[tokio::test]
async fn test_cancel_before_start_lists_nothing() {
    let source = store_with(vec![("logs/a.log", b"line".to_vec())]).await;
    let sink = Arc::new(MemorySink::new());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = pipeline(source, sink.clone(), settings())
        .run(cancel)
        .await
        .unwrap();

    assert!(report.cancelled);
    assert_eq!(report.listed_objects, 0);
    assert_eq!(sink.put_calls(), 0);
}

#[tokio::test]
async fn test_cancel_stops_remaining_batches() {
    let text: String = (0..5).map(|i| format!("line {}\n", i)).collect();
    let source = store_with(vec![
        ("logs/a.log", text.into_bytes()),
        ("logs/b.log", b"never".to_vec()),
    ])
    .await;
    let sink = Arc::new(MemorySink::with_upload_delay(Duration::from_millis(200)));
    let mut settings = settings();
    settings.limits.max_count = Some(1);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let report = pipeline(source, sink.clone(), settings)
        .run(cancel)
        .await
        .unwrap();

    assert!(report.cancelled);
    assert_eq!(report.listed_objects, 1);
    assert_eq!(report.cancelled_objects, 1);
    assert_eq!(report.uploaded_batches, 1);
    assert_eq!(sink.messages_by_stream()[STREAM], vec!["line 0"]);
}

#[tokio::test]
async fn test_file_sink_end_to_end() {
    let source = store_with(vec![("logs/a.log.gz", gzip("alpha\nbeta\n"))]).await;
    let dir = TempDir::new().unwrap();
    let sink = Arc::new(FileSink::new(dir.path()));

    let report = pipeline(source, sink.clone(), settings())
        .run(CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.processed_objects, 1);

    let contents = std::fs::read_to_string(sink.stream_path(GROUP, STREAM)).unwrap();
    let events: Vec<serde_json::Value> = contents
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0]["message"], "alpha");
    assert_eq!(events[1]["timestamp"], NOW_MILLIS);
}

#[tokio::test]
async fn test_record_timestamps_split_streams() {
    let text = "2024-09-02T23:59:59Z late\n2024-09-03T00:00:00Z early\nno timestamp here\n";
    let source = store_with(vec![("logs/a.log", text.as_bytes().to_vec())]).await;
    let sink = Arc::new(MemorySink::new());
    let clock = Arc::new(FixedClock::from_millis(NOW_MILLIS));
    let timestamps = TimestampResolver::from_config(
        &logship::config::types::TimestampConfig::Record {
            pattern: r"^(?P<ts>\S+)".to_string(),
            format: "iso8601".to_string(),
        },
        clock,
    )
    .unwrap();

    let pipeline = IngestionPipeline::new(
        Collaborators {
            lister: source.clone(),
            fetcher: source,
            lines: Arc::new(GzipOrPlain),
            sink: sink.clone(),
        },
        settings(),
        timestamps,
        Granularity::Daily,
    );
    let report = pipeline.run(CancellationToken::new()).await.unwrap();

    assert_eq!(report.uploaded_batches, 2);
    let messages = sink.messages_by_stream();
    assert_eq!(messages["log_stream-19968"], vec!["2024-09-02T23:59:59Z late"]);
    assert_eq!(
        messages[STREAM],
        vec!["2024-09-03T00:00:00Z early", "no timestamp here"]
    );
}
