//! Middleware traits and the continuations they call.
//!
//! A middleware wraps "the rest of the pipeline", handed to it as a `Next`
//! value. Calling [`Next::run`] continues toward the handler; not calling it
//! short-circuits. Continuations are consumed on use, so a middleware can
//! invoke the rest of its pipeline at most once.
//!
//! Order: lower values run first (outermost). An order returned by the
//! instance ([`RequestMiddleware::order`] and friends) wins over the order
//! given at registration, which wins over the default of `0`. Equal orders
//! keep registration order.
//!
//! # Example
//!
//! ```
//! use courier_core::error::DispatchError;
//! use courier_core::middleware::{Next, RequestMiddleware};
//! use courier_core::request::Request;
//! use futures::future::{BoxFuture, FutureExt};
//! use tokio_util::sync::CancellationToken;
//!
//! struct CreateThing {
//!     name: String,
//! }
//!
//! impl Request for CreateThing {
//!     type Response = u64;
//! }
//!
//! struct RejectEmptyName;
//!
//! impl RequestMiddleware<CreateThing> for RejectEmptyName {
//!     fn order(&self) -> Option<i32> {
//!         Some(100)
//!     }
//!
//!     fn handle(
//!         &self,
//!         request: CreateThing,
//!         next: Next<CreateThing>,
//!         _cancel: CancellationToken,
//!     ) -> BoxFuture<'_, Result<u64, DispatchError>> {
//!         async move {
//!             if request.name.is_empty() {
//!                 return Err(DispatchError::failed("name must not be empty"));
//!             }
//!             next.run(request).await
//!         }
//!         .boxed()
//!     }
//! }
//! ```

use crate::error::DispatchError;
use crate::notification::NotificationEnvelope;
use crate::request::{Request, StreamRequest};
use futures::future::BoxFuture;
use futures::stream::{self, BoxStream, StreamExt};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Composed request pipeline (or a suffix of one).
pub type RequestInvoker<R> = Arc<
    dyn Fn(R, CancellationToken) -> BoxFuture<'static, Result<<R as Request>::Response, DispatchError>>
        + Send
        + Sync,
>;

/// Items flowing out of a stream pipeline.
pub type ItemStream<T> = BoxStream<'static, Result<T, DispatchError>>;

/// Composed stream pipeline (or a suffix of one).
pub type StreamInvoker<R> =
    Arc<dyn Fn(R, CancellationToken) -> ItemStream<<R as StreamRequest>::Item> + Send + Sync>;

/// Composed notification pipeline (or a suffix of one).
pub type NotificationInvoker = Arc<
    dyn Fn(NotificationEnvelope, CancellationToken) -> BoxFuture<'static, Result<(), DispatchError>>
        + Send
        + Sync,
>;

/// Order fixed on the middleware type itself.
///
/// Passed at registration through `MiddlewareOptions::from_static`; an
/// instance-resolved order still takes precedence.
pub trait StaticOrder {
    /// The type-level order.
    const ORDER: i32;
}

/// Wrapper around the next step of one request shape's pipeline.
pub trait RequestMiddleware<R: Request>: Send + Sync + 'static {
    /// Order resolved from this instance, typically from its configuration.
    fn order(&self) -> Option<i32> {
        None
    }

    /// Process the request, optionally calling `next`.
    ///
    /// Errors produced by `next` should be returned unchanged. The
    /// middleware's own failures go through [`DispatchError::failed`].
    fn handle(
        &self,
        request: R,
        next: Next<R>,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<R::Response, DispatchError>>;
}

/// Wrapper around the next step of one stream request's pipeline.
pub trait StreamMiddleware<R: StreamRequest>: Send + Sync + 'static {
    /// Order resolved from this instance.
    fn order(&self) -> Option<i32> {
        None
    }

    /// Produce the item stream, usually by transforming `next.run(request)`.
    fn handle(
        &self,
        request: R,
        next: StreamNext<R>,
        cancel: CancellationToken,
    ) -> ItemStream<R::Item>;
}

/// Wrapper around notification fan-out, possibly constrained by capabilities.
///
/// The capability constraint is given at registration; middleware whose
/// constraint is not satisfied is left out of the pipeline entirely.
pub trait NotificationMiddleware: Send + Sync + 'static {
    /// Order resolved from this instance.
    fn order(&self) -> Option<i32> {
        None
    }

    /// Process the notification, optionally calling `next`.
    fn handle(
        &self,
        envelope: NotificationEnvelope,
        next: NotificationNext,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<(), DispatchError>>;
}

/// The rest of a request pipeline.
pub struct Next<R: Request> {
    invoker: RequestInvoker<R>,
    cancel: CancellationToken,
}

impl<R: Request> Next<R> {
    /// Continuation over `invoker`, observing `cancel`.
    #[must_use]
    pub fn new(invoker: RequestInvoker<R>, cancel: CancellationToken) -> Self {
        Self { invoker, cancel }
    }

    /// Run the remaining pipeline.
    ///
    /// # Errors
    ///
    /// [`DispatchError::Cancelled`] if cancellation was raised before this
    /// step, otherwise whatever the remaining pipeline returns.
    pub async fn run(self, request: R) -> Result<R::Response, DispatchError> {
        if self.cancel.is_cancelled() {
            return Err(DispatchError::Cancelled);
        }
        (self.invoker)(request, self.cancel).await
    }
}

/// The rest of a stream pipeline.
pub struct StreamNext<R: StreamRequest> {
    invoker: StreamInvoker<R>,
    cancel: CancellationToken,
}

impl<R: StreamRequest> StreamNext<R> {
    /// Continuation over `invoker`, observing `cancel`.
    #[must_use]
    pub fn new(invoker: StreamInvoker<R>, cancel: CancellationToken) -> Self {
        Self { invoker, cancel }
    }

    /// Build the remaining pipeline's stream.
    ///
    /// Once cancelled, the stream yields a single [`DispatchError::Cancelled`].
    #[must_use]
    pub fn run(self, request: R) -> ItemStream<R::Item> {
        if self.cancel.is_cancelled() {
            return stream::once(async { Err::<R::Item, _>(DispatchError::Cancelled) }).boxed();
        }
        (self.invoker)(request, self.cancel)
    }
}

/// The rest of a notification pipeline.
pub struct NotificationNext {
    invoker: NotificationInvoker,
    cancel: CancellationToken,
}

impl NotificationNext {
    /// Continuation over `invoker`, observing `cancel`.
    #[must_use]
    pub fn new(invoker: NotificationInvoker, cancel: CancellationToken) -> Self {
        Self { invoker, cancel }
    }

    /// Run the remaining pipeline.
    ///
    /// # Errors
    ///
    /// [`DispatchError::Cancelled`] if cancellation was raised before this
    /// step, otherwise whatever the remaining pipeline returns.
    pub async fn run(self, envelope: NotificationEnvelope) -> Result<(), DispatchError> {
        if self.cancel.is_cancelled() {
            return Err(DispatchError::Cancelled);
        }
        (self.invoker)(envelope, self.cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;

    struct Echo;
    impl Request for Echo {
        type Response = &'static str;
    }

    fn terminal() -> RequestInvoker<Echo> {
        Arc::new(|_request: Echo, _cancel: CancellationToken| async { Ok::<_, DispatchError>("done") }.boxed())
    }

    #[tokio::test]
    async fn test_next_runs_invoker() {
        let next = Next::new(terminal(), CancellationToken::new());
        assert_eq!(next.run(Echo).await.ok(), Some("done"));
    }

    #[tokio::test]
    async fn test_next_refuses_after_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let next = Next::new(terminal(), cancel);
        assert!(next.run(Echo).await.is_err_and(|error| error.is_cancelled()));
    }
}
