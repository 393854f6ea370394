//! Dispatch Benchmarks
//!
//! Measures the per-dispatch overhead the mediator adds on top of handler work:
//! - Request pipeline depth: bare handler vs. stacked middleware
//! - Notification fan-out: sequential vs. concurrent processors
//! - Constraint filtering: cost of skipped middleware
//!
//! Run with: `cargo bench`

#![allow(missing_docs)] // Benchmarks don't need extensive docs
#![allow(clippy::expect_used)] // Benchmarks can use expect for setup

use courier_core::notification;
use courier_core::prelude::*;
use courier_runtime::{FanOutStrategy, Mediator, MediatorConfig, MiddlewareOptions, Registry};
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use std::sync::Arc;

struct Add(u64, u64);
impl Request for Add {
    type Response = u64;
}

struct Adder;
impl RequestHandler<Add> for Adder {
    fn handle(&self, request: Add, _cancel: CancellationToken) -> BoxFuture<'_, Result<u64, BoxError>> {
        async move { Ok(request.0 + request.1) }.boxed()
    }
}

struct PassThrough;
impl RequestMiddleware<Add> for PassThrough {
    fn handle(&self, request: Add, next: Next<Add>, _cancel: CancellationToken) -> BoxFuture<'_, Result<u64, DispatchError>> {
        async move { next.run(request).await }.boxed()
    }
}

impl NotificationMiddleware for PassThrough {
    fn handle(
        &self,
        envelope: NotificationEnvelope,
        next: NotificationNext,
        _cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<(), DispatchError>> {
        async move { next.run(envelope).await }.boxed()
    }
}

struct Rare;
impl Capability for Rare {}

struct Tick;
notification!(Tick);

struct Listener;
impl NotificationSubscriber<Tick> for Listener {
    fn on_notification<'a>(&'a self, _tick: &'a Tick, _cancel: CancellationToken) -> BoxFuture<'a, Result<(), BoxError>> {
        async { Ok(()) }.boxed()
    }
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to build runtime")
}

/// Benchmark request dispatch through growing middleware stacks
fn benchmark_request_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("request_pipeline");
    group.throughput(Throughput::Elements(1));
    let runtime = runtime();

    for depth in [0usize, 1, 4, 16] {
        let registry = (0..depth)
            .fold(Registry::builder().handler::<Add, _>(Adder), |builder, _| {
                builder.request_middleware::<Add, _>(PassThrough)
            })
            .build();
        let mediator = Mediator::new(registry, ServiceMap::new());

        group.bench_with_input(BenchmarkId::new("middleware", depth), &depth, |b, _| {
            b.to_async(&runtime).iter(|| async {
                let _ = mediator.send(black_box(Add(1, 2))).await;
            });
        });
    }

    group.finish();
}

/// Benchmark notification fan-out by strategy and subscriber count
fn benchmark_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("fan_out");
    let runtime = runtime();

    for strategy in [FanOutStrategy::Sequential, FanOutStrategy::Concurrent] {
        for subscribers in [1usize, 10, 100] {
            let config = MediatorConfig::default().with_fan_out(strategy);
            let mediator = Mediator::with_config(Registry::builder().build(), ServiceMap::new(), config);
            let listeners: Vec<Arc<Listener>> = (0..subscribers).map(|_| Arc::new(Listener)).collect();
            for listener in &listeners {
                mediator.subscribe::<Tick, _>(listener);
            }

            group.throughput(Throughput::Elements(subscribers as u64));
            group.bench_with_input(
                BenchmarkId::new(format!("{strategy:?}"), subscribers),
                &subscribers,
                |b, _| {
                    b.to_async(&runtime).iter(|| async {
                        let _ = mediator.publish(black_box(Tick)).await;
                    });
                },
            );
        }
    }

    group.finish();
}

/// Benchmark publishes where most middleware is filtered out by constraints
fn benchmark_constraint_filtering(c: &mut Criterion) {
    let mut group = c.benchmark_group("constraint_filtering");
    let runtime = runtime();

    for constrained in [0usize, 8, 32] {
        let registry = (0..constrained)
            .fold(Registry::builder().notification_middleware(PassThrough), |builder, _| {
                builder.notification_middleware_with_options(PassThrough, MiddlewareOptions::new().requires::<Rare>())
            })
            .build();
        let mediator = Mediator::new(registry, ServiceMap::new());

        group.bench_with_input(BenchmarkId::new("skipped", constrained), &constrained, |b, _| {
            b.to_async(&runtime).iter(|| async {
                let _ = mediator.publish(black_box(Tick)).await;
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_request_pipeline,
    benchmark_fan_out,
    benchmark_constraint_filtering,
);
criterion_main!(benches);
