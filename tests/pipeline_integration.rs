//! End-to-end pipeline tests: HTTP page source -> paginator -> processor.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::{Value, json};
use streamfetch::events::{FETCH_PAGE, PROCESSOR_COMPLETED, PROCESSOR_ITEM_FAILED};
use streamfetch::{
    ChannelSink, ConcurrentProcessor, ErrorKind, ErrorRecord, EventSink, ExecutorConfig,
    HttpPageSource, HttpSourceConfig, PaginatedFetcher, PaginationConfig, ProcessorConfig,
    RequestExecutor, ResumeLedger, ResumePoint, RetryPolicy, Shutdown, Tracked, TrackedSource,
};
use wiremock::matchers::{method, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Mock for page `page` of a collection of `pages` pages, ids counting from 0.
fn collection_page(page: usize, pages: usize, per_page: usize) -> Mock {
    let items: Vec<Value> = (0..per_page)
        .map(|i| json!({"id": page * per_page + i, "title": format!("doc-{}", page * per_page + i)}))
        .collect();
    let last = page + 1 == pages;
    let body = json!({
        "results": items,
        "has_more": !last,
        "next_cursor": if last { Value::Null } else { json!(format!("p{}", page + 1)) },
    });

    let mock = Mock::given(method("GET"));
    let mock = if page == 0 {
        mock.and(query_param_is_missing("start_cursor"))
    } else {
        mock.and(query_param("start_cursor", format!("p{page}")))
    };
    mock.respond_with(ResponseTemplate::new(200).set_body_json(body))
}

/// Mounts `pages` pages of `per_page` items each, each fetched exactly once.
async fn mount_collection(server: &MockServer, pages: usize, per_page: usize) {
    for page in 0..pages {
        collection_page(page, pages, per_page)
            .expect(1)
            .mount(server)
            .await;
    }
}

fn fetcher(executor: Arc<RequestExecutor>) -> PaginatedFetcher {
    PaginatedFetcher::new(
        executor,
        PaginationConfig {
            page_size: 10,
            inter_page_delay: Duration::ZERO,
            yield_every: 7,
            ..PaginationConfig::default()
        },
    )
}

fn executor() -> Arc<RequestExecutor> {
    Arc::new(RequestExecutor::new(ExecutorConfig {
        retry: RetryPolicy::new(3, Duration::from_millis(10), Duration::from_millis(50), 2.0),
        ..ExecutorConfig::default()
    }))
}

fn http_source(server: &MockServer) -> Arc<HttpPageSource> {
    Arc::new(HttpPageSource::new(&server.uri(), HttpSourceConfig::default()).unwrap())
}

#[tokio::test]
async fn test_pipeline_transforms_every_item_once() {
    let server = MockServer::start().await;
    mount_collection(&server, 4, 10).await;

    let pages = fetcher(executor()).stream_source::<Value, _>(http_source(&server));
    let processor = ConcurrentProcessor::new(ProcessorConfig::with_concurrency(8)).unwrap();
    let results: Vec<_> = processor
        .process(pages, |item: Value| async move {
            Ok::<_, ErrorRecord>(item["id"].as_u64().unwrap())
        })
        .unwrap()
        .collect()
        .await;

    let ids: HashSet<u64> = results.into_iter().map(Result::unwrap).collect();
    assert_eq!(ids, (0..40).collect::<HashSet<_>>());
}

#[tokio::test]
async fn test_pipeline_partial_failure_reports_aggregate_last() {
    let server = MockServer::start().await;
    mount_collection(&server, 3, 10).await;

    let pages = fetcher(executor()).stream_source::<Value, _>(http_source(&server));
    let processor = ConcurrentProcessor::new(ProcessorConfig::with_concurrency(4)).unwrap();
    let results: Vec<_> = processor
        .process(pages, |item: Value| async move {
            let id = item["id"].as_u64().unwrap();
            if id % 10 == 3 {
                Err(ErrorRecord::new(ErrorKind::Validation, format!("rejected {id}")))
            } else {
                Ok(id)
            }
        })
        .unwrap()
        .collect()
        .await;

    assert_eq!(results.len(), 28);
    assert!(results[..27].iter().all(Result::is_ok));
    let aggregate = results[27].as_ref().unwrap_err();
    assert_eq!(aggregate.len(), 3);
    assert_eq!(aggregate.count_by_kind().get(&ErrorKind::Validation), Some(&3));
    for record in aggregate.errors() {
        assert!(record.context_value("item_index").is_some());
    }
}

#[tokio::test]
async fn test_pipeline_page_failure_keeps_earlier_results() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(query_param_is_missing("start_cursor"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [{"id": 0}, {"id": 1}],
            "has_more": true,
            "next_cursor": "p1"
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(query_param("start_cursor", "p1"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({"code": "unauthorized"})))
        .expect(1)
        .mount(&server)
        .await;

    let pages = fetcher(executor()).stream_source::<Value, _>(http_source(&server));
    let checkpoint = pages.checkpoint();
    let processor = ConcurrentProcessor::new(ProcessorConfig::with_concurrency(2)).unwrap();
    let results: Vec<_> = processor
        .process(pages, |item: Value| async move { Ok::<_, ErrorRecord>(item) })
        .unwrap()
        .collect()
        .await;

    assert_eq!(results.len(), 3);
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 2);
    let aggregate = results[2].as_ref().unwrap_err();
    assert_eq!(aggregate.errors()[0].kind(), ErrorKind::Unauthorized);
    assert_eq!(checkpoint.cursor().as_deref(), Some("p1"), "resume point is the failed page");
    assert!(!checkpoint.is_complete());
}

#[tokio::test]
async fn test_pipeline_events_cover_pages_failures_and_completion() {
    let server = MockServer::start().await;
    mount_collection(&server, 2, 3).await;

    let (sink, mut events) = ChannelSink::channel();
    let sink: Arc<dyn EventSink> = Arc::new(sink);

    let pages = fetcher(executor())
        .with_event_sink(Arc::clone(&sink))
        .stream_source::<Value, _>(http_source(&server));
    let processor = ConcurrentProcessor::new(ProcessorConfig::with_concurrency(3))
        .unwrap()
        .with_event_sink(sink);
    let results: Vec<_> = processor
        .process(pages, |item: Value| async move {
            if item["id"] == json!(4) {
                Err(ErrorRecord::new(ErrorKind::Validation, "bad"))
            } else {
                Ok(item)
            }
        })
        .unwrap()
        .collect()
        .await;
    assert_eq!(results.len(), 6);

    let mut types = Vec::new();
    while let Ok(event) = events.try_recv() {
        types.push(event.event_type);
    }
    assert_eq!(types.iter().filter(|t| *t == FETCH_PAGE).count(), 2);
    assert_eq!(types.iter().filter(|t| *t == PROCESSOR_ITEM_FAILED).count(), 1);
    assert_eq!(types.iter().filter(|t| *t == PROCESSOR_COMPLETED).count(), 1);
}

/// Streams `server` from `start`, settling each written item in a ledger.
/// Triggers shutdown once `stop_after` items have been written.
async fn run_tracked(
    server: &MockServer,
    start: Option<String>,
    stop_after: Option<usize>,
) -> (Vec<u64>, ResumePoint) {
    let shutdown = Shutdown::new();
    let executor = Arc::new(
        RequestExecutor::new(ExecutorConfig {
            retry: RetryPolicy::new(3, Duration::from_millis(10), Duration::from_millis(50), 2.0),
            ..ExecutorConfig::default()
        })
        .with_shutdown(shutdown.clone()),
    );
    let fetcher = PaginatedFetcher::new(
        executor,
        PaginationConfig {
            page_size: 1,
            inter_page_delay: Duration::ZERO,
            initial_cursor: start.clone(),
            ..PaginationConfig::default()
        },
    );

    let ledger = Arc::new(ResumeLedger::new(start));
    let source = TrackedSource::new(http_source(server), Arc::clone(&ledger));
    let pages = fetcher.stream_source::<Tracked<Value>, _>(Arc::new(source));

    let processor = ConcurrentProcessor::new(ProcessorConfig {
        concurrency: 1,
        input_capacity: 20,
        output_capacity: None,
    })
    .unwrap()
    .with_shutdown(shutdown.clone());
    let mut results = processor
        .process(pages, |tracked: Tracked<Value>| async move {
            Ok::<_, ErrorRecord>(tracked)
        })
        .unwrap();

    let mut written = Vec::new();
    while let Some(result) = results.next().await {
        let Ok(Tracked { page, item }) = result else {
            continue;
        };
        written.push(item["id"].as_u64().unwrap());
        ledger.settle(page);
        if Some(written.len()) == stop_after {
            shutdown.trigger();
        }
    }
    (written, ledger.resume_point())
}

#[tokio::test]
async fn test_resume_after_shutdown_skips_no_item() {
    let server = MockServer::start().await;
    for page in 0..50 {
        collection_page(page, 50, 1).mount(&server).await;
    }

    let (first, resume) = run_tracked(&server, None, Some(3)).await;
    assert!(first.len() >= 3);
    let ResumePoint::Cursor(cursor) = resume else {
        panic!("expected a resume cursor, got {resume:?}");
    };
    assert_eq!(cursor, format!("p{}", first.len()), "resume at the first unwritten item");

    let (rest, resume) = run_tracked(&server, Some(cursor), None).await;
    assert_eq!(resume, ResumePoint::Complete);

    let all: Vec<u64> = first.into_iter().chain(rest).collect();
    assert_eq!(all, (0..50).collect::<Vec<_>>());
}
