//! Integration tests for stream requests
//!
//! Stream pipelines compose like request pipelines but yield items lazily;
//! routing failures and cancellation surface as stream items.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use courier_core::prelude::*;
use courier_runtime::{DispatchOptions, Mediator, Registry, SessionId};
use courier_testing::{CallLog, RecordingMiddleware};
use futures::stream;
use std::time::Duration;

// ============================================================================
// Test Fixtures
// ============================================================================

struct CountTo(u32);
impl StreamRequest for CountTo {
    type Item = u32;
}

struct Forever;
impl StreamRequest for Forever {
    type Item = u64;
}

struct Counter;

impl StreamRequestHandler<CountTo> for Counter {
    fn handle(&self, request: CountTo, _cancel: CancellationToken) -> BoxStream<'static, Result<u32, BoxError>> {
        stream::iter((1..=request.0).map(Ok)).boxed()
    }
}

struct BrokenCounter;

impl StreamRequestHandler<CountTo> for BrokenCounter {
    fn handle(&self, _request: CountTo, _cancel: CancellationToken) -> BoxStream<'static, Result<u32, BoxError>> {
        stream::iter([Ok(1), Err(BoxError::from("sensor unplugged"))]).boxed()
    }
}

struct ForeverHandler;

impl StreamRequestHandler<Forever> for ForeverHandler {
    fn handle(&self, _request: Forever, _cancel: CancellationToken) -> BoxStream<'static, Result<u64, BoxError>> {
        stream::unfold(0u64, |n| async move {
            tokio::time::sleep(Duration::from_millis(1)).await;
            Some((Ok(n), n + 1))
        })
        .boxed()
    }
}

/// Doubles every item on its way out.
struct Doubler;

impl StreamMiddleware<CountTo> for Doubler {
    fn handle(&self, request: CountTo, next: StreamNext<CountTo>, _cancel: CancellationToken) -> ItemStream<u32> {
        next.run(request)
            .map(|item| item.map(|n| n * 2))
            .boxed()
    }
}

fn mediator(registry: Registry) -> Mediator {
    courier_testing::init_test_tracing();
    Mediator::new(registry, ServiceMap::new())
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_stream_yields_every_item() {
    let registry = Registry::builder().stream_handler::<CountTo, _>(Counter).build();

    let items: Vec<u32> = mediator(registry)
        .create_stream(CountTo(3))
        .map(Result::unwrap)
        .collect()
        .await;

    assert_eq!(items, [1, 2, 3]);
}

#[tokio::test]
async fn test_stream_middleware_wraps_items_in_order() {
    let log = CallLog::new();
    let registry = Registry::builder()
        .stream_handler::<CountTo, _>(Counter)
        .stream_middleware::<CountTo, _>(Doubler)
        .stream_middleware::<CountTo, _>(RecordingMiddleware::new("outer", &log).with_order(-1))
        .build();

    let items: Vec<u32> = mediator(registry)
        .create_stream(CountTo(2))
        .map(Result::unwrap)
        .collect()
        .await;

    assert_eq!(items, [2, 4]);
    assert_eq!(log.entries(), ["outer:before", "outer:after"]);
}

#[tokio::test]
async fn test_missing_stream_handler_is_a_single_error_item() {
    let items: Vec<_> = mediator(Registry::builder().build())
        .create_stream(CountTo(3))
        .collect()
        .await;

    assert_eq!(items.len(), 1);
    assert!(matches!(items[0], Err(DispatchError::HandlerNotFound { .. })));
}

#[tokio::test]
async fn test_handler_item_error_is_attributed() {
    let registry = Registry::builder().stream_handler::<CountTo, _>(BrokenCounter).build();

    let items: Vec<_> = mediator(registry).create_stream(CountTo(0)).collect().await;

    assert_eq!(*items[0].as_ref().unwrap(), 1);
    match &items[1] {
        Err(DispatchError::HandlerFailed { handler, .. }) => assert_eq!(*handler, "BrokenCounter"),
        other => panic!("unexpected item: {other:?}"),
    }
}

#[tokio::test]
async fn test_cancellation_ends_stream_with_cancelled() {
    let registry = Registry::builder().stream_handler::<Forever, _>(ForeverHandler).build();
    let cancel = CancellationToken::new();
    let mut items = mediator(registry).create_stream_with(
        Forever,
        DispatchOptions::new().with_cancellation(cancel.clone()),
    );

    assert_eq!(items.next().await.unwrap().unwrap(), 0);
    assert_eq!(items.next().await.unwrap().unwrap(), 1);
    cancel.cancel();

    assert!(items.next().await.unwrap().unwrap_err().is_cancelled());
    assert!(items.next().await.is_none());
}

#[tokio::test]
async fn test_stream_requests_are_counted_as_requests() {
    let registry = Registry::builder().stream_handler::<CountTo, _>(Counter).build();
    let mediator = mediator(registry);

    let _items: Vec<_> = mediator
        .create_stream_with(CountTo(1), DispatchOptions::new().with_session("reader"))
        .collect()
        .await;

    assert_eq!(mediator.statistics().snapshot_global().request_count("CountTo"), 1);
    assert!(mediator
        .statistics()
        .snapshot_session(&SessionId::from("reader"))
        .is_some());
}
