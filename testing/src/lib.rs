//! # Courier Testing
//!
//! Testing utilities and helpers for the Courier mediator.
//!
//! This crate provides:
//! - Deterministic clocks for the statistics and subscriber trackers
//! - A shared call log and middleware / subscribers that write to it
//! - Failing components for error attribution tests
//! - Tracing setup for tests
//!
//! ## Example
//!
//! ```ignore
//! use courier_testing::{CallLog, RecordingMiddleware};
//!
//! #[tokio::test]
//! async fn test_middleware_order() {
//!     let log = CallLog::new();
//!     let registry = Registry::builder()
//!         .handler::<Ping, _>(PingHandler)
//!         .request_middleware::<Ping, _>(RecordingMiddleware::new("outer", &log).with_order(-10))
//!         .request_middleware::<Ping, _>(RecordingMiddleware::new("inner", &log))
//!         .build();
//!
//!     Mediator::new(registry, ServiceMap::new()).send(Ping).await.unwrap();
//!
//!     assert_eq!(log.entries(), ["outer:before", "inner:before", "inner:after", "outer:after"]);
//! }
//! ```

use chrono::{DateTime, Utc};
use courier_core::environment::Clock;

/// Deterministic clocks.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use chrono::TimeDelta;
    use std::sync::{Mutex, PoisonError};
    use std::time::Duration;

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use courier_testing::mocks::FixedClock;
    /// use courier_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that only moves when told to.
    ///
    /// Share it behind an `Arc` between the mediator and the test to drive
    /// idle-session eviction.
    ///
    /// ```
    /// use courier_testing::mocks::ManualClock;
    /// use courier_core::environment::Clock;
    /// use std::time::Duration;
    ///
    /// let clock = ManualClock::starting_at(courier_testing::test_time());
    /// let before = clock.now();
    /// clock.advance(Duration::from_secs(90));
    /// assert_eq!((clock.now() - before).num_seconds(), 90);
    /// ```
    #[derive(Debug)]
    pub struct ManualClock {
        time: Mutex<DateTime<Utc>>,
    }

    impl ManualClock {
        /// Clock reading `time` until advanced.
        #[must_use]
        pub const fn starting_at(time: DateTime<Utc>) -> Self {
            Self {
                time: Mutex::new(time),
            }
        }

        /// Move the clock forward. Saturates instead of overflowing.
        pub fn advance(&self, by: Duration) {
            let mut time = self.time.lock().unwrap_or_else(PoisonError::into_inner);
            let advanced = TimeDelta::from_std(by)
                .ok()
                .and_then(|delta| time.checked_add_signed(delta));
            if let Some(advanced) = advanced {
                *time = advanced;
            }
        }

        /// Jump to `time`.
        pub fn set(&self, time: DateTime<Utc>) {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner) = time;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    /// 2025-01-01 00:00:00 UTC
    #[must_use]
    pub fn test_time() -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH + TimeDelta::seconds(1_735_689_600)
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(test_time())
    }

    /// Create a manual clock starting at 2025-01-01 00:00:00 UTC
    #[must_use]
    pub fn manual_clock() -> ManualClock {
        ManualClock::starting_at(test_time())
    }
}

/// Components that record what ran, in order.
pub mod recording {
    use courier_core::error::{BoxError, DispatchError};
    use courier_core::handler::{GenericSubscriber, NotificationSubscriber};
    use courier_core::middleware::{
        ItemStream, Next, NotificationMiddleware, NotificationNext, RequestMiddleware,
        StreamMiddleware, StreamNext,
    };
    use courier_core::notification::{Notification, NotificationEnvelope};
    use courier_core::request::{Request, StreamRequest};
    use futures::future::{BoxFuture, FutureExt};
    use std::sync::{Arc, Mutex, PoisonError};
    use tokio_util::sync::CancellationToken;

    /// Shared, ordered log of labels.
    #[derive(Debug, Clone, Default)]
    pub struct CallLog {
        entries: Arc<Mutex<Vec<String>>>,
    }

    impl CallLog {
        /// Empty log.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Append an entry.
        pub fn push(&self, entry: impl Into<String>) {
            self.entries
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(entry.into());
        }

        /// Everything logged so far.
        #[must_use]
        pub fn entries(&self) -> Vec<String> {
            self.entries
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        /// Number of entries.
        #[must_use]
        pub fn len(&self) -> usize {
            self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
        }

        /// Whether nothing was logged.
        #[must_use]
        pub fn is_empty(&self) -> bool {
            self.len() == 0
        }

        /// Forget everything.
        pub fn clear(&self) {
            self.entries.lock().unwrap_or_else(PoisonError::into_inner).clear();
        }
    }

    /// Middleware that logs `label:before` and `label:after` around `next`.
    ///
    /// Works in request, stream and notification pipelines. In stream
    /// pipelines both entries are written when the stream is built.
    #[derive(Debug, Clone)]
    pub struct RecordingMiddleware {
        label: &'static str,
        order: Option<i32>,
        log: CallLog,
    }

    impl RecordingMiddleware {
        /// Middleware logging to `log` under `label`.
        #[must_use]
        pub fn new(label: &'static str, log: &CallLog) -> Self {
            Self {
                label,
                order: None,
                log: log.clone(),
            }
        }

        /// Report `order` as the instance-resolved order.
        #[must_use]
        pub const fn with_order(mut self, order: i32) -> Self {
            self.order = Some(order);
            self
        }
    }

    impl<R: Request> RequestMiddleware<R> for RecordingMiddleware {
        fn order(&self) -> Option<i32> {
            self.order
        }

        fn handle(
            &self,
            request: R,
            next: Next<R>,
            _cancel: CancellationToken,
        ) -> BoxFuture<'_, Result<R::Response, DispatchError>> {
            async move {
                self.log.push(format!("{}:before", self.label));
                let outcome = next.run(request).await;
                self.log.push(format!("{}:after", self.label));
                outcome
            }
            .boxed()
        }
    }

    impl<R: StreamRequest> StreamMiddleware<R> for RecordingMiddleware {
        fn order(&self) -> Option<i32> {
            self.order
        }

        fn handle(&self, request: R, next: StreamNext<R>, _cancel: CancellationToken) -> ItemStream<R::Item> {
            self.log.push(format!("{}:before", self.label));
            let items = next.run(request);
            self.log.push(format!("{}:after", self.label));
            items
        }
    }

    impl NotificationMiddleware for RecordingMiddleware {
        fn order(&self) -> Option<i32> {
            self.order
        }

        fn handle(
            &self,
            envelope: NotificationEnvelope,
            next: NotificationNext,
            _cancel: CancellationToken,
        ) -> BoxFuture<'_, Result<(), DispatchError>> {
            async move {
                self.log.push(format!("{}:before", self.label));
                let outcome = next.run(envelope).await;
                self.log.push(format!("{}:after", self.label));
                outcome
            }
            .boxed()
        }
    }

    /// Subscriber that logs `label:Shape` for every notification it sees.
    ///
    /// Implements both the typed and the generic subscriber traits.
    #[derive(Debug, Clone)]
    pub struct RecordingSubscriber {
        label: &'static str,
        log: CallLog,
    }

    impl RecordingSubscriber {
        /// Subscriber logging to `log` under `label`.
        #[must_use]
        pub fn new(label: &'static str, log: &CallLog) -> Arc<Self> {
            Arc::new(Self {
                label,
                log: log.clone(),
            })
        }
    }

    impl<N: Notification> NotificationSubscriber<N> for RecordingSubscriber {
        fn on_notification<'a>(
            &'a self,
            _notification: &'a N,
            _cancel: CancellationToken,
        ) -> BoxFuture<'a, Result<(), BoxError>> {
            self.log.push(format!(
                "{}:{}",
                self.label,
                courier_core::shape::short_type_name::<N>()
            ));
            futures::future::ready(Ok(())).boxed()
        }
    }

    impl GenericSubscriber for RecordingSubscriber {
        fn on_any<'a>(
            &'a self,
            envelope: &'a NotificationEnvelope,
            _cancel: CancellationToken,
        ) -> BoxFuture<'a, Result<(), BoxError>> {
            self.log.push(format!("{}:{}", self.label, envelope.shape()));
            futures::future::ready(Ok(())).boxed()
        }
    }
}

/// Components that fail on purpose.
pub mod failing {
    use courier_core::error::{BoxError, DispatchError};
    use courier_core::handler::{GenericSubscriber, NotificationSubscriber};
    use courier_core::middleware::{Next, NotificationMiddleware, NotificationNext, RequestMiddleware};
    use courier_core::notification::{Notification, NotificationEnvelope};
    use courier_core::request::Request;
    use futures::future::{BoxFuture, FutureExt};
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    /// Middleware that fails without calling `next`.
    #[derive(Debug, Clone)]
    pub struct FailingMiddleware {
        message: &'static str,
    }

    impl FailingMiddleware {
        /// Middleware failing with `message`.
        #[must_use]
        pub const fn new(message: &'static str) -> Self {
            Self { message }
        }
    }

    impl<R: Request> RequestMiddleware<R> for FailingMiddleware {
        fn handle(
            &self,
            _request: R,
            _next: Next<R>,
            _cancel: CancellationToken,
        ) -> BoxFuture<'_, Result<R::Response, DispatchError>> {
            futures::future::ready(Err(DispatchError::failed(self.message))).boxed()
        }
    }

    impl NotificationMiddleware for FailingMiddleware {
        fn handle(
            &self,
            _envelope: NotificationEnvelope,
            _next: NotificationNext,
            _cancel: CancellationToken,
        ) -> BoxFuture<'_, Result<(), DispatchError>> {
            futures::future::ready(Err(DispatchError::failed(self.message))).boxed()
        }
    }

    /// Subscriber that always fails.
    #[derive(Debug, Clone)]
    pub struct FailingSubscriber {
        message: &'static str,
    }

    impl FailingSubscriber {
        /// Subscriber failing with `message`.
        #[must_use]
        pub fn new(message: &'static str) -> Arc<Self> {
            Arc::new(Self { message })
        }
    }

    impl<N: Notification> NotificationSubscriber<N> for FailingSubscriber {
        fn on_notification<'a>(
            &'a self,
            _notification: &'a N,
            _cancel: CancellationToken,
        ) -> BoxFuture<'a, Result<(), BoxError>> {
            futures::future::ready(Err(BoxError::from(self.message))).boxed()
        }
    }

    impl GenericSubscriber for FailingSubscriber {
        fn on_any<'a>(
            &'a self,
            _envelope: &'a NotificationEnvelope,
            _cancel: CancellationToken,
        ) -> BoxFuture<'a, Result<(), BoxError>> {
            futures::future::ready(Err(BoxError::from(self.message))).boxed()
        }
    }
}

/// Test helpers and utilities.
pub mod helpers {
    use anyhow::{Context, anyhow};
    use courier_core::error::{AggregateNotificationFailure, DispatchError};
    use tracing_subscriber::EnvFilter;

    /// Install a test-writer tracing subscriber once; later calls are no-ops.
    ///
    /// Honors `RUST_LOG`, defaulting to `courier_runtime=debug`.
    pub fn init_test_tracing() {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("courier_runtime=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    }

    /// The aggregate failure inside a publish error.
    ///
    /// # Errors
    ///
    /// Fails when `error` is any other dispatch error.
    pub fn aggregate_failure(error: &DispatchError) -> anyhow::Result<&AggregateNotificationFailure> {
        error
            .as_notification_failure()
            .ok_or_else(|| anyhow!("expected a notification failure, got: {error}"))
    }

    /// Names of the failing processors in a publish error.
    ///
    /// # Errors
    ///
    /// Fails when `error` is not a notification failure.
    pub fn failed_processors(error: &DispatchError) -> anyhow::Result<Vec<&'static str>> {
        aggregate_failure(error)
            .map(AggregateNotificationFailure::processors)
            .context("collecting failed processors")
    }
}

// Re-export commonly used items
pub use failing::{FailingMiddleware, FailingSubscriber};
pub use helpers::{aggregate_failure, failed_processors, init_test_tracing};
pub use mocks::{FixedClock, ManualClock, manual_clock, test_clock, test_time};
pub use recording::{CallLog, RecordingMiddleware, RecordingSubscriber};
