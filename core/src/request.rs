//! Request shapes: commands and queries routed to exactly one handler.

use std::any::TypeId;

/// A command or query accepting `Self` as input and producing [`Request::Response`].
///
/// Exactly one [`RequestHandler`](crate::handler::RequestHandler) must be
/// registered per request type.
///
/// # Example
///
/// ```
/// use courier_core::request::{Request, RequestKind};
///
/// struct CreateThing {
///     name: String,
/// }
///
/// struct ThingId(u64);
///
/// impl Request for CreateThing {
///     type Response = ThingId;
/// }
///
/// assert_eq!(RequestKind::of::<CreateThing>(), RequestKind::Query);
/// ```
pub trait Request: Send + 'static {
    /// The value the handler produces. `()` for commands.
    type Response: Send + 'static;
}

/// A request producing no value.
pub trait Command: Request<Response = ()> {}

impl<T: Request<Response = ()>> Command for T {}

/// Static classification of a request shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum RequestKind {
    /// Produces a value.
    Query,
    /// Produces nothing.
    Command,
}

impl RequestKind {
    /// Classify `R` by its response type.
    #[must_use]
    pub fn of<R: Request>() -> Self {
        if TypeId::of::<R::Response>() == TypeId::of::<()>() {
            Self::Command
        } else {
            Self::Query
        }
    }

    /// Lowercase label (`query` or `command`).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Command => "command",
        }
    }
}

impl std::fmt::Display for RequestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request answered with a stream of items rather than a single value.
pub trait StreamRequest: Send + 'static {
    /// Type of each streamed item.
    type Item: Send + 'static;
}
