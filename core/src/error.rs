//! Error taxonomy for dispatch, resolution and inspection.
//!
//! The engine never recovers from request pipeline errors; its only added
//! value is attribution (which handler or middleware failed, for which shape).
//! Notification failures are collected per processor and reported together.

use crate::shape::Shape;
use std::fmt;
use thiserror::Error;

/// Boxed error returned by handlers, subscribers and constraint predicates.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced to callers of `send`, `publish` and `create_stream`.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// No handler is registered for the request shape.
    #[error("No handler registered for request '{shape}'")]
    HandlerNotFound {
        /// The request shape
        shape: Shape,
    },

    /// More than one handler is registered for the request shape.
    #[error("Request '{shape}' resolves to {} handlers: {}", .candidates.len(), .candidates.join(", "))]
    AmbiguousHandler {
        /// The request shape
        shape: Shape,
        /// Every registered candidate, in registration order
        candidates: Vec<&'static str>,
    },

    /// The handler returned an error.
    #[error("Handler '{handler}' failed while processing '{shape}': {source}")]
    HandlerFailed {
        /// The failing handler
        handler: &'static str,
        /// The request shape
        shape: Shape,
        /// The handler's error
        #[source]
        source: BoxError,
    },

    /// A middleware raised its own error.
    #[error("Middleware '{middleware}' failed while processing '{shape}': {source}")]
    MiddlewareExecutionFailed {
        /// The failing middleware
        middleware: &'static str,
        /// The request or notification shape
        shape: Shape,
        /// The middleware's error
        #[source]
        source: BoxError,
    },

    /// One or more notification processors failed.
    #[error(transparent)]
    NotificationFailed(#[from] AggregateNotificationFailure),

    /// A handler or middleware could not be constructed.
    #[error("Resolution failed: {0}")]
    Resolution(#[from] ResolveError),

    /// The cancellation signal was raised before the pipeline completed.
    #[error("Dispatch cancelled")]
    Cancelled,

    /// An error raised by a middleware that the pipeline has not yet attributed.
    ///
    /// Middleware return this through [`DispatchError::failed`]; the composer
    /// rewrites it to [`DispatchError::MiddlewareExecutionFailed`].
    #[error("{0}")]
    Failed(#[source] BoxError),
}

impl DispatchError {
    /// Wrap a middleware's own error for attribution by the pipeline.
    pub fn failed(error: impl Into<BoxError>) -> Self {
        Self::Failed(error.into())
    }

    /// Whether this error reports a cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// The aggregate notification failure, if this is one.
    #[must_use]
    pub const fn as_notification_failure(&self) -> Option<&AggregateNotificationFailure> {
        match self {
            Self::NotificationFailed(aggregate) => Some(aggregate),
            _ => None,
        }
    }
}

/// Which kind of processor failed during fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum ProcessorKind {
    /// Registered through the registry builder.
    AutomaticHandler,
    /// Subscribed at runtime for one shape.
    ManualSubscriber,
    /// Subscribed at runtime for every notification.
    GenericSubscriber,
}

impl fmt::Display for ProcessorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AutomaticHandler => write!(f, "handler"),
            Self::ManualSubscriber => write!(f, "subscriber"),
            Self::GenericSubscriber => write!(f, "generic subscriber"),
        }
    }
}

/// One failing notification processor.
#[derive(Error, Debug)]
#[error("{kind} '{processor}' failed: {source}")]
pub struct NotificationProcessorFailed {
    /// Processor name
    pub processor: &'static str,
    /// Processor kind
    pub kind: ProcessorKind,
    /// The processor's error
    #[source]
    pub source: BoxError,
}

/// Every processor that failed during one publish.
#[derive(Error, Debug)]
#[error("{} notification processor(s) failed while publishing '{}': {}", .failures.len(), .shape, summarize(.failures))]
pub struct AggregateNotificationFailure {
    /// The notification shape
    pub shape: Shape,
    /// Failures in processor order
    pub failures: Vec<NotificationProcessorFailed>,
}

impl AggregateNotificationFailure {
    /// Names of the failing processors, in processor order.
    #[must_use]
    pub fn processors(&self) -> Vec<&'static str> {
        self.failures.iter().map(|failure| failure.processor).collect()
    }
}

fn summarize(failures: &[NotificationProcessorFailed]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Failures of the resolution context or of a registered factory.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// A required service is not available in the context.
    #[error("No service registered for '{0}'")]
    Missing(&'static str),

    /// A factory could not build its component.
    #[error("Failed to construct '{component}': {reason}")]
    Construction {
        /// The component being built
        component: &'static str,
        /// Why construction failed
        reason: String,
    },
}

/// A custom capability constraint failed while being evaluated.
///
/// Only the inspector reports this; dispatch excludes the middleware instead.
#[derive(Error, Debug)]
#[error("Constraint '{constraint}' of middleware '{middleware}' failed to evaluate for '{shape}': {source}")]
pub struct ConstraintEvaluationError {
    /// The constrained middleware
    pub middleware: &'static str,
    /// Rendered constraint
    pub constraint: String,
    /// The shape being analyzed
    pub shape: Shape,
    /// The predicate's error
    #[source]
    pub source: BoxError,
}

/// Errors returned by the pipeline inspector.
#[derive(Error, Debug)]
pub enum InspectionError {
    /// A constraint predicate failed.
    #[error(transparent)]
    Constraint(#[from] ConstraintEvaluationError),

    /// A middleware could not be resolved to read its order.
    #[error("Resolution failed: {0}")]
    Resolution(#[from] ResolveError),
}
