//! # Courier Core
//!
//! Core traits and types for the Courier in-process mediator.
//!
//! Callers hand a typed request or notification to the mediator, which routes
//! it through an ordered chain of middleware to exactly one handler (requests)
//! or to every interested processor (notifications). Caller and handler never
//! reference each other.
//!
//! ## Core Concepts
//!
//! - **Shape**: the nominal identity of a request or notification type
//! - **Request**: command or query answered by exactly one handler
//! - **Notification**: event fanned out to any number of handlers and subscribers
//! - **Middleware**: ordered wrapper around the next pipeline step
//! - **Capability**: marker a notification declares; constrained middleware keys on it
//! - **Resolution context**: the container handlers and middleware are built from
//!
//! ## Example
//!
//! ```ignore
//! use courier_core::prelude::*;
//!
//! struct CreateThing { name: String }
//! impl Request for CreateThing { type Response = ThingId; }
//!
//! impl RequestHandler<CreateThing> for CreateThingHandler {
//!     fn handle(&self, request: CreateThing, _cancel: CancellationToken)
//!         -> BoxFuture<'_, Result<ThingId, BoxError>>
//!     {
//!         async move { Ok(ThingId::new(&request.name)) }.boxed()
//!     }
//! }
//! ```

pub use chrono::{DateTime, Utc};
pub use tokio_util::sync::CancellationToken;

pub mod capability;
pub mod error;
pub mod handler;
pub mod middleware;
pub mod notification;
pub mod request;
pub mod resolution;
pub mod shape;

/// Declarative macros for capability declarations
#[macro_use]
pub mod macros;

/// Environment module - time abstraction shared by the trackers
///
/// Session idle detection and subscription timestamps read the current time
/// through [`Clock`](environment::Clock) so tests can control it.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```ignore
    /// // Test - fixed time for deterministic tests
    /// struct FixedClock { time: DateTime<Utc> }
    /// impl Clock for FixedClock {
    ///     fn now(&self) -> DateTime<Utc> {
    ///         self.time
    ///     }
    /// }
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall clock
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

/// Everything a handler or middleware author usually needs.
pub mod prelude {
    pub use crate::capability::{Capability, CapabilityConstraint, CapabilityId, CapabilitySet};
    pub use crate::error::{BoxError, DispatchError};
    pub use crate::handler::{
        GenericSubscriber, NotificationHandler, NotificationSubscriber, RequestHandler,
        StreamRequestHandler,
    };
    pub use crate::middleware::{
        ItemStream, Next, NotificationMiddleware, NotificationNext, RequestMiddleware,
        StaticOrder, StreamMiddleware, StreamNext,
    };
    pub use crate::notification::{Notification, NotificationEnvelope};
    pub use crate::request::{Command, Request, RequestKind, StreamRequest};
    pub use crate::resolution::{ResolutionContext, ResolveExt, ServiceMap};
    pub use crate::shape::Shape;
    pub use futures::future::{BoxFuture, FutureExt};
    pub use futures::stream::{BoxStream, StreamExt};
    pub use tokio_util::sync::CancellationToken;
}

pub use capability::{Capability, CapabilityConstraint, CapabilityId, CapabilitySet};
pub use error::{BoxError, DispatchError};
pub use shape::Shape;

#[cfg(test)]
mod tests {
    use super::environment::{Clock, SystemClock};

    #[test]
    fn test_system_clock_moves_forward() {
        let clock = SystemClock;
        let first = clock.now();
        let second = clock.now();
        assert!(second >= first);
    }
}
