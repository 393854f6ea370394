//! Processors: request handlers, stream handlers, notification handlers and subscribers.
//!
//! Every processor method returns a boxed future instead of being an
//! `async fn` so the traits stay dyn-compatible; the registry stores them as
//! `Arc<dyn ...>`.
//!
//! # Example
//!
//! ```
//! use courier_core::error::BoxError;
//! use courier_core::handler::RequestHandler;
//! use courier_core::request::Request;
//! use futures::future::{BoxFuture, FutureExt};
//! use tokio_util::sync::CancellationToken;
//!
//! struct CreateThing {
//!     name: String,
//! }
//!
//! impl Request for CreateThing {
//!     type Response = usize;
//! }
//!
//! struct CreateThingHandler;
//!
//! impl RequestHandler<CreateThing> for CreateThingHandler {
//!     fn handle(
//!         &self,
//!         request: CreateThing,
//!         _cancel: CancellationToken,
//!     ) -> BoxFuture<'_, Result<usize, BoxError>> {
//!         async move { Ok(request.name.len()) }.boxed()
//!     }
//! }
//! ```

use crate::error::BoxError;
use crate::notification::{Notification, NotificationEnvelope};
use crate::request::{Request, StreamRequest};
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use tokio_util::sync::CancellationToken;

/// Business logic bound to exactly one request shape.
pub trait RequestHandler<R: Request>: Send + Sync + 'static {
    /// Handle the request.
    ///
    /// Returning a boxed [`DispatchError`](crate::error::DispatchError) passes
    /// it to the caller unchanged; any other error is attributed to this handler.
    fn handle(
        &self,
        request: R,
        cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<R::Response, BoxError>>;
}

/// Business logic answering a stream request.
pub trait StreamRequestHandler<R: StreamRequest>: Send + Sync + 'static {
    /// Produce the item stream. The stream must not borrow the handler.
    fn handle(
        &self,
        request: R,
        cancel: CancellationToken,
    ) -> BoxStream<'static, Result<R::Item, BoxError>>;
}

/// Automatically resolved processor for one notification shape.
///
/// A type may implement this for several shapes and be registered for each.
pub trait NotificationHandler<N: Notification>: Send + Sync + 'static {
    /// Process the notification.
    fn handle<'a>(
        &'a self,
        notification: &'a N,
        cancel: CancellationToken,
    ) -> BoxFuture<'a, Result<(), BoxError>>;
}

/// Manually subscribed listener for one notification shape.
///
/// Subscriptions hold the listener weakly: dropping the last `Arc` ends it.
pub trait NotificationSubscriber<N: Notification>: Send + Sync + 'static {
    /// React to the notification.
    fn on_notification<'a>(
        &'a self,
        notification: &'a N,
        cancel: CancellationToken,
    ) -> BoxFuture<'a, Result<(), BoxError>>;
}

/// Manually subscribed listener receiving every published notification.
pub trait GenericSubscriber: Send + Sync + 'static {
    /// React to any notification.
    fn on_any<'a>(
        &'a self,
        envelope: &'a NotificationEnvelope,
        cancel: CancellationToken,
    ) -> BoxFuture<'a, Result<(), BoxError>>;
}
