//! Integration tests for request dispatch
//!
//! Covers handler routing, middleware ordering, error attribution,
//! resolution failures and cancellation of the request pipeline.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use courier_core::error::ResolveError;
use courier_core::prelude::*;
use courier_runtime::{DispatchOptions, Mediator, MiddlewareOptions, Registry, SessionId};
use courier_testing::{CallLog, FailingMiddleware, RecordingMiddleware};

// ============================================================================
// Test Fixtures
// ============================================================================

struct Ping;
impl Request for Ping {
    type Response = &'static str;
}

struct Rename {
    name: String,
}
impl Request for Rename {
    type Response = ();
}

struct PingHandler {
    log: CallLog,
}

impl RequestHandler<Ping> for PingHandler {
    fn handle(&self, _request: Ping, _cancel: CancellationToken) -> BoxFuture<'_, Result<&'static str, BoxError>> {
        self.log.push("handler");
        async { Ok("pong") }.boxed()
    }
}

struct OtherPingHandler;

impl RequestHandler<Ping> for OtherPingHandler {
    fn handle(&self, _request: Ping, _cancel: CancellationToken) -> BoxFuture<'_, Result<&'static str, BoxError>> {
        async { Ok("other") }.boxed()
    }
}

struct BrokenPingHandler;

impl RequestHandler<Ping> for BrokenPingHandler {
    fn handle(&self, _request: Ping, _cancel: CancellationToken) -> BoxFuture<'_, Result<&'static str, BoxError>> {
        async { Err(BoxError::from("disk on fire")) }.boxed()
    }
}

/// Fails with an unattributed dispatch error.
struct UnattributedPingHandler;

impl RequestHandler<Ping> for UnattributedPingHandler {
    fn handle(&self, _request: Ping, _cancel: CancellationToken) -> BoxFuture<'_, Result<&'static str, BoxError>> {
        async { Err(Box::new(DispatchError::failed("handler broke")) as BoxError) }.boxed()
    }
}

/// Hands a dispatch error back through the handler boundary.
struct CancellingPingHandler;

impl RequestHandler<Ping> for CancellingPingHandler {
    fn handle(&self, _request: Ping, _cancel: CancellationToken) -> BoxFuture<'_, Result<&'static str, BoxError>> {
        async { Err(Box::new(DispatchError::Cancelled) as BoxError) }.boxed()
    }
}

struct RenameHandler {
    log: CallLog,
}

impl RequestHandler<Rename> for RenameHandler {
    fn handle(&self, request: Rename, _cancel: CancellationToken) -> BoxFuture<'_, Result<(), BoxError>> {
        self.log.push(format!("renamed:{}", request.name));
        async { Ok(()) }.boxed()
    }
}

/// Cancels the dispatch, then continues.
struct CancelThenContinue;

impl RequestMiddleware<Ping> for CancelThenContinue {
    fn handle(
        &self,
        request: Ping,
        next: Next<Ping>,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<&'static str, DispatchError>> {
        cancel.cancel();
        async move { next.run(request).await }.boxed()
    }
}

/// Answers without calling the rest of the pipeline.
struct ShortCircuit;

impl RequestMiddleware<Ping> for ShortCircuit {
    fn handle(
        &self,
        _request: Ping,
        _next: Next<Ping>,
        _cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<&'static str, DispatchError>> {
        async { Ok("cached") }.boxed()
    }
}

#[derive(Debug)]
struct Greeting(&'static str);

struct CreateThing {
    name: String,
}
impl Request for CreateThing {
    type Response = u64;
}

struct CreateThingHandler {
    log: CallLog,
}

impl RequestHandler<CreateThing> for CreateThingHandler {
    fn handle(&self, request: CreateThing, _cancel: CancellationToken) -> BoxFuture<'_, Result<u64, BoxError>> {
        self.log.push("handler");
        async move { Ok(request.name.len() as u64) }.boxed()
    }
}

struct NameValidator {
    log: CallLog,
}

impl RequestMiddleware<CreateThing> for NameValidator {
    fn handle(
        &self,
        request: CreateThing,
        next: Next<CreateThing>,
        _cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<u64, DispatchError>> {
        async move {
            self.log.push("validate");
            if request.name.is_empty() {
                return Err(DispatchError::failed("name must not be empty"));
            }
            next.run(request).await
        }
        .boxed()
    }
}

fn mediator(registry: Registry) -> Mediator {
    courier_testing::init_test_tracing();
    Mediator::new(registry, ServiceMap::new())
}

// ============================================================================
// Routing
// ============================================================================

#[tokio::test]
async fn test_request_reaches_its_handler() {
    let log = CallLog::new();
    let registry = Registry::builder()
        .handler::<Ping, _>(PingHandler { log: log.clone() })
        .build();

    let response = mediator(registry).send(Ping).await.unwrap();

    assert_eq!(response, "pong");
    assert_eq!(log.entries(), ["handler"]);
}

#[tokio::test]
async fn test_unregistered_request_is_handler_not_found() {
    let error = mediator(Registry::builder().build()).send(Ping).await.unwrap_err();

    match error {
        DispatchError::HandlerNotFound { shape } => assert_eq!(shape.name(), "Ping"),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_middleware_without_handler_is_still_not_found() {
    let log = CallLog::new();
    let registry = Registry::builder()
        .request_middleware::<Ping, _>(RecordingMiddleware::new("outer", &log))
        .build();

    let error = mediator(registry).send(Ping).await.unwrap_err();

    assert!(matches!(error, DispatchError::HandlerNotFound { .. }));
    assert!(log.is_empty());
}

#[tokio::test]
async fn test_two_handlers_are_ambiguous() {
    let registry = Registry::builder()
        .handler::<Ping, _>(PingHandler { log: CallLog::new() })
        .handler::<Ping, _>(OtherPingHandler)
        .build();

    let error = mediator(registry).send(Ping).await.unwrap_err();

    match error {
        DispatchError::AmbiguousHandler { shape, candidates } => {
            assert_eq!(shape.name(), "Ping");
            assert_eq!(candidates, ["PingHandler", "OtherPingHandler"]);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_send_command_returns_unit() {
    let log = CallLog::new();
    let registry = Registry::builder()
        .handler::<Rename, _>(RenameHandler { log: log.clone() })
        .build();

    mediator(registry)
        .send_command(Rename { name: "kettle".into() })
        .await
        .unwrap();

    assert_eq!(log.entries(), ["renamed:kettle"]);
}

#[tokio::test]
async fn test_handler_factory_resolves_from_context() {
    let registry = Registry::builder()
        .handler_factory::<Ping, _, _>(|context: &dyn ResolutionContext| {
            let greeting = context.require::<Greeting>()?;
            let log = CallLog::new();
            log.push(greeting.0);
            Ok(PingHandler { log })
        })
        .build();
    let mediator = Mediator::new(registry, ServiceMap::new().with(Greeting("hello")));

    assert_eq!(mediator.send(Ping).await.unwrap(), "pong");
}

#[tokio::test]
async fn test_missing_service_is_resolution_error() {
    let registry = Registry::builder()
        .handler_factory::<Ping, _, _>(|context: &dyn ResolutionContext| {
            context.require::<Greeting>()?;
            Ok(OtherPingHandler)
        })
        .build();

    let error = mediator(registry).send(Ping).await.unwrap_err();

    match error {
        DispatchError::Resolution(ResolveError::Missing(service)) => assert_eq!(service, "Greeting"),
        other => panic!("unexpected error: {other}"),
    }
}

// ============================================================================
// Middleware ordering
// ============================================================================

#[tokio::test]
async fn test_middleware_runs_by_order_then_registration() {
    let log = CallLog::new();
    let registry = Registry::builder()
        .handler::<Ping, _>(PingHandler { log: log.clone() })
        .request_middleware::<Ping, _>(RecordingMiddleware::new("late", &log).with_order(10))
        .request_middleware::<Ping, _>(RecordingMiddleware::new("default", &log))
        .request_middleware::<Ping, _>(RecordingMiddleware::new("early-a", &log).with_order(-5))
        .request_middleware_with_options::<Ping, _>(
            RecordingMiddleware::new("early-b", &log),
            MiddlewareOptions::new().with_order(-5),
        )
        .build();

    mediator(registry).send(Ping).await.unwrap();

    assert_eq!(
        log.entries(),
        [
            "early-a:before",
            "early-b:before",
            "default:before",
            "late:before",
            "handler",
            "late:after",
            "default:after",
            "early-b:after",
            "early-a:after",
        ]
    );
}

#[tokio::test]
async fn test_validation_middleware_guards_the_handler() {
    let log = CallLog::new();
    let registry = Registry::builder()
        .handler::<CreateThing, _>(CreateThingHandler { log: log.clone() })
        .request_middleware_with_options::<CreateThing, _>(
            NameValidator { log: log.clone() },
            MiddlewareOptions::new().with_order(100),
        )
        .request_middleware::<CreateThing, _>(RecordingMiddleware::new("logging", &log).with_order(-100))
        .build();
    let mediator = mediator(registry);

    let error = mediator
        .send(CreateThing { name: String::new() })
        .await
        .unwrap_err();
    match error {
        DispatchError::MiddlewareExecutionFailed { middleware, .. } => assert_eq!(middleware, "NameValidator"),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(log.entries(), ["logging:before", "validate", "logging:after"]);

    log.clear();
    let id = mediator.send(CreateThing { name: "x".into() }).await.unwrap();
    assert_eq!(id, 1);
    assert_eq!(
        log.entries(),
        ["logging:before", "validate", "handler", "logging:after"]
    );
}

#[tokio::test]
async fn test_instance_order_overrides_registered_order() {
    let log = CallLog::new();
    let registry = Registry::builder()
        .handler::<Ping, _>(PingHandler { log: log.clone() })
        .request_middleware_with_options::<Ping, _>(
            RecordingMiddleware::new("instance", &log).with_order(1),
            MiddlewareOptions::new().with_order(-100),
        )
        .request_middleware::<Ping, _>(RecordingMiddleware::new("zero", &log))
        .build();

    mediator(registry).send(Ping).await.unwrap();

    assert_eq!(log.entries()[..2], ["zero:before", "instance:before"]);
}

#[tokio::test]
async fn test_middleware_can_short_circuit() {
    let log = CallLog::new();
    let registry = Registry::builder()
        .handler::<Ping, _>(PingHandler { log: log.clone() })
        .request_middleware::<Ping, _>(ShortCircuit)
        .build();

    assert_eq!(mediator(registry).send(Ping).await.unwrap(), "cached");
    assert!(log.is_empty());
}

// ============================================================================
// Errors
// ============================================================================

#[tokio::test]
async fn test_handler_error_is_attributed() {
    let registry = Registry::builder().handler::<Ping, _>(BrokenPingHandler).build();

    let error = mediator(registry).send(Ping).await.unwrap_err();

    match error {
        DispatchError::HandlerFailed { handler, shape, source } => {
            assert_eq!(handler, "BrokenPingHandler");
            assert_eq!(shape.name(), "Ping");
            assert_eq!(source.to_string(), "disk on fire");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_dispatch_error_from_handler_passes_through() {
    let registry = Registry::builder().handler::<Ping, _>(CancellingPingHandler).build();

    let error = mediator(registry).send(Ping).await.unwrap_err();

    assert!(error.is_cancelled());
}

#[tokio::test]
async fn test_unattributed_handler_failure_is_blamed_on_the_handler() {
    let log = CallLog::new();
    let registry = Registry::builder()
        .handler::<Ping, _>(UnattributedPingHandler)
        .request_middleware::<Ping, _>(RecordingMiddleware::new("logging", &log))
        .build();

    let error = mediator(registry).send(Ping).await.unwrap_err();

    match error {
        DispatchError::HandlerFailed { handler, shape, source } => {
            assert_eq!(handler, "UnattributedPingHandler");
            assert_eq!(shape.name(), "Ping");
            assert_eq!(source.to_string(), "handler broke");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(log.entries(), ["logging:before", "logging:after"]);
}

#[tokio::test]
async fn test_middleware_error_is_attributed_and_stops_the_pipeline() {
    let log = CallLog::new();
    let registry = Registry::builder()
        .handler::<Ping, _>(PingHandler { log: log.clone() })
        .request_middleware::<Ping, _>(RecordingMiddleware::new("outer", &log))
        .request_middleware::<Ping, _>(FailingMiddleware::new("rate limited"))
        .build();

    let error = mediator(registry).send(Ping).await.unwrap_err();

    match error {
        DispatchError::MiddlewareExecutionFailed { middleware, source, .. } => {
            assert_eq!(middleware, "FailingMiddleware");
            assert_eq!(source.to_string(), "rate limited");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(log.entries(), ["outer:before", "outer:after"]);
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test]
async fn test_cancellation_inside_pipeline_stops_before_handler() {
    let log = CallLog::new();
    let registry = Registry::builder()
        .handler::<Ping, _>(PingHandler { log: log.clone() })
        .request_middleware::<Ping, _>(CancelThenContinue)
        .build();

    let error = mediator(registry)
        .send_with(Ping, DispatchOptions::new().with_cancellation(CancellationToken::new()))
        .await
        .unwrap_err();

    assert!(matches!(error, DispatchError::Cancelled));
    assert!(log.is_empty());
}

// ============================================================================
// Statistics
// ============================================================================

#[tokio::test]
async fn test_dispatch_is_counted_globally_and_per_session() {
    let registry = Registry::builder().handler::<Ping, _>(OtherPingHandler).build();
    let mediator = mediator(registry);

    mediator.send(Ping).await.unwrap();
    mediator
        .send_with(Ping, DispatchOptions::new().with_session("alice"))
        .await
        .unwrap();
    mediator.send(Rename { name: "x".into() }).await.unwrap_err();

    let global = mediator.statistics().snapshot_global();
    assert_eq!(global.request_count("Ping"), 2);
    assert_eq!(global.request_count("Rename"), 1);

    let alice = mediator
        .statistics()
        .snapshot_session(&SessionId::from("alice"))
        .unwrap();
    assert_eq!(alice.counts.total_requests(), 1);
}
