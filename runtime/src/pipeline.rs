//! Pipeline composition.
//!
//! A pipeline is built per dispatch by folding the resolved middleware, from
//! innermost to outermost, around a terminal invoker. The outermost
//! middleware (lowest order) runs first and sees the final result last.
//!
//! Every middleware step is timed into a [`StepRecorder`]. Middleware
//! failures raised through [`DispatchError::Failed`] are attributed to the
//! step that produced them; errors passed up from inner steps are left alone.

use courier_core::error::{BoxError, DispatchError};
use courier_core::handler::{RequestHandler, StreamRequestHandler};
use courier_core::middleware::{
    ItemStream, Next, NotificationInvoker, NotificationMiddleware, NotificationNext,
    RequestInvoker, RequestMiddleware, StreamInvoker, StreamMiddleware, StreamNext,
};
use courier_core::notification::NotificationEnvelope;
use courier_core::request::{Request, StreamRequest};
use courier_core::shape::Shape;
use futures::future::FutureExt;
use futures::stream::{Stream, StreamExt};
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Which pipeline a middleware belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PipelineKind {
    /// Pipeline of one request shape
    Request(Shape),
    /// Pipeline of one stream request shape
    Stream(Shape),
    /// The shared notification pipeline
    Notification,
}

/// Read the instance-resolved order of a middleware trait object.
pub(crate) trait InstanceOrder {
    fn instance_order(&self) -> Option<i32>;
}

impl<R: Request> InstanceOrder for dyn RequestMiddleware<R> {
    fn instance_order(&self) -> Option<i32> {
        self.order()
    }
}

impl<R: StreamRequest> InstanceOrder for dyn StreamMiddleware<R> {
    fn instance_order(&self) -> Option<i32> {
        self.order()
    }
}

impl InstanceOrder for dyn NotificationMiddleware {
    fn instance_order(&self) -> Option<i32> {
        self.order()
    }
}

/// A middleware instance with its settled order.
pub(crate) struct ResolvedMiddleware<T: ?Sized> {
    pub(crate) name: &'static str,
    pub(crate) order: i32,
    pub(crate) sequence: u64,
    pub(crate) instance: Arc<T>,
}

/// Sort ascending by order, then registration sequence.
pub(crate) fn order_middleware<T: ?Sized>(middleware: &mut [ResolvedMiddleware<T>]) {
    middleware.sort_by_key(|step| (step.order, step.sequence));
}

/// Timing of one middleware step.
#[derive(Debug, Clone, Serialize)]
pub struct StepTiming {
    /// Middleware name
    pub middleware: &'static str,
    /// Time spent in the step, including everything it wrapped
    pub elapsed: Duration,
    /// Whether the step returned successfully
    pub succeeded: bool,
}

/// Collects step timings for one dispatch.
#[derive(Debug, Clone, Default)]
pub(crate) struct StepRecorder {
    steps: Arc<Mutex<Vec<StepTiming>>>,
}

impl StepRecorder {
    fn record(&self, middleware: &'static str, elapsed: Duration, succeeded: bool) {
        self.steps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(StepTiming {
                middleware,
                elapsed,
                succeeded,
            });
    }

    /// Drain the recorded steps, in completion order (innermost first).
    pub(crate) fn take(&self) -> Vec<StepTiming> {
        std::mem::take(&mut *self.steps.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// What happened during one dispatch.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineExecutionRecord {
    /// Dispatched shape
    pub shape: Shape,
    /// Pipeline used
    pub pipeline: PipelineKind,
    /// Middleware composed into the pipeline, outermost first
    pub middleware: Vec<&'static str>,
    /// Middleware left out because their constraint did not apply
    pub skipped: Vec<&'static str>,
    /// Steps that actually ran, innermost first
    pub steps: Vec<StepTiming>,
    /// Notification processors targeted; 1 for requests
    pub processors: usize,
    /// Wall time of the whole dispatch
    pub duration: Duration,
    /// Whether the dispatch returned successfully
    pub succeeded: bool,
}

impl PipelineExecutionRecord {
    /// Number of middleware steps that ran. Short-circuits reduce this below
    /// the composed count.
    #[must_use]
    pub fn executed_middleware(&self) -> usize {
        self.steps.len()
    }

    /// Number of middleware excluded by constraints.
    #[must_use]
    pub fn skipped_middleware(&self) -> usize {
        self.skipped.len()
    }
}

fn attribute_middleware(error: DispatchError, middleware: &'static str, shape: Shape) -> DispatchError {
    match error {
        DispatchError::Failed(source) => DispatchError::MiddlewareExecutionFailed {
            middleware,
            shape,
            source,
        },
        other => other,
    }
}

/// Attribute a handler error. A boxed [`DispatchError`] passes through
/// unless it is unattributed, in which case it belongs to the handler.
pub(crate) fn attribute_handler(source: BoxError, handler: &'static str, shape: Shape) -> DispatchError {
    match source.downcast::<DispatchError>() {
        Ok(error) => match *error {
            DispatchError::Failed(source) => DispatchError::HandlerFailed {
                handler,
                shape,
                source,
            },
            other => other,
        },
        Err(source) => DispatchError::HandlerFailed {
            handler,
            shape,
            source,
        },
    }
}

/// Terminal step of a request pipeline: the handler.
pub(crate) fn request_terminal<R: Request>(
    shape: Shape,
    name: &'static str,
    handler: Arc<dyn RequestHandler<R>>,
) -> RequestInvoker<R> {
    Arc::new(move |request: R, cancel: CancellationToken| {
        let handler = Arc::clone(&handler);
        async move {
            tracing::trace!(handler = name, "Invoking handler");
            handler
                .handle(request, cancel)
                .await
                .map_err(|source| attribute_handler(source, name, shape))
        }
        .boxed()
    })
}

/// Wrap `terminal` in `middleware`, which must already be ordered.
pub(crate) fn compose_request<R: Request>(
    shape: Shape,
    middleware: Vec<ResolvedMiddleware<dyn RequestMiddleware<R>>>,
    terminal: RequestInvoker<R>,
    recorder: &StepRecorder,
) -> RequestInvoker<R> {
    middleware.into_iter().rev().fold(terminal, |next, step| {
        let recorder = recorder.clone();
        let invoker: RequestInvoker<R> = Arc::new(move |request: R, cancel: CancellationToken| {
            let instance = Arc::clone(&step.instance);
            let next = Next::new(Arc::clone(&next), cancel.clone());
            let recorder = recorder.clone();
            let name = step.name;
            async move {
                tracing::trace!(middleware = name, "Entering middleware");
                let started = Instant::now();
                let outcome = instance.handle(request, next, cancel).await;
                recorder.record(name, started.elapsed(), outcome.is_ok());
                outcome.map_err(|error| attribute_middleware(error, name, shape))
            }
            .boxed()
        });
        invoker
    })
}

/// Terminal step of a stream pipeline, ending the stream on cancellation.
pub(crate) fn stream_terminal<R: StreamRequest>(
    shape: Shape,
    name: &'static str,
    handler: Arc<dyn StreamRequestHandler<R>>,
) -> StreamInvoker<R> {
    Arc::new(move |request: R, cancel: CancellationToken| {
        tracing::trace!(handler = name, "Opening stream");
        let items = handler
            .handle(request, cancel.clone())
            .map(move |item| item.map_err(|source| attribute_handler(source, name, shape)));
        until_cancelled(items, cancel)
    })
}

/// Forward `items` until `cancel` fires, then yield one [`DispatchError::Cancelled`].
pub(crate) fn until_cancelled<T, S>(items: S, cancel: CancellationToken) -> ItemStream<T>
where
    T: Send + 'static,
    S: Stream<Item = Result<T, DispatchError>> + Send + 'static,
{
    Box::pin(async_stream::stream! {
        let mut items = Box::pin(items);
        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                item = items.next() => Some(item),
            };
            match next {
                None => {
                    yield Err(DispatchError::Cancelled);
                    break;
                }
                Some(Some(item)) => yield item,
                Some(None) => break,
            }
        }
    })
}

/// Wrap a stream terminal in `middleware`, which must already be ordered.
///
/// Stream steps are timed for construction only; items flow lazily afterwards.
pub(crate) fn compose_stream<R: StreamRequest>(
    shape: Shape,
    middleware: Vec<ResolvedMiddleware<dyn StreamMiddleware<R>>>,
    terminal: StreamInvoker<R>,
    recorder: &StepRecorder,
) -> StreamInvoker<R> {
    middleware.into_iter().rev().fold(terminal, |next, step| {
        let recorder = recorder.clone();
        let invoker: StreamInvoker<R> = Arc::new(move |request: R, cancel: CancellationToken| {
            let name = step.name;
            let started = Instant::now();
            let items = step
                .instance
                .handle(request, StreamNext::new(Arc::clone(&next), cancel.clone()), cancel);
            recorder.record(name, started.elapsed(), true);
            items
                .map(move |item| item.map_err(|error| attribute_middleware(error, name, shape)))
                .boxed()
        });
        invoker
    })
}

/// Wrap the fan-out terminal in notification middleware, already filtered and ordered.
pub(crate) fn compose_notification(
    shape: Shape,
    middleware: Vec<ResolvedMiddleware<dyn NotificationMiddleware>>,
    terminal: NotificationInvoker,
    recorder: &StepRecorder,
) -> NotificationInvoker {
    middleware.into_iter().rev().fold(terminal, |next, step| {
        let recorder = recorder.clone();
        let invoker: NotificationInvoker =
            Arc::new(move |envelope: NotificationEnvelope, cancel: CancellationToken| {
                let instance = Arc::clone(&step.instance);
                let next = NotificationNext::new(Arc::clone(&next), cancel.clone());
                let recorder = recorder.clone();
                let name = step.name;
                async move {
                    tracing::trace!(middleware = name, "Entering notification middleware");
                    let started = Instant::now();
                    let outcome = instance.handle(envelope, next, cancel).await;
                    recorder.record(name, started.elapsed(), outcome.is_ok());
                    outcome.map_err(|error| attribute_middleware(error, name, shape))
                }
                .boxed()
            });
        invoker
    })
}
