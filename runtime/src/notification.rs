//! Notification processors and fan-out.
//!
//! A publish targets every automatic handler registered for the shape plus
//! every live manual subscriber (typed and generic). These are unified as
//! [`NotificationProcessor`]s and run by the terminal fan-out step, which
//! never stops at the first failure: every processor gets its turn and all
//! failures come back together as one
//! [`AggregateNotificationFailure`](courier_core::error::AggregateNotificationFailure).

use crate::metrics::DispatchMetrics;
use crate::subscribers::SubscriptionId;
use courier_core::capability::{CapabilityConstraint, CapabilitySet};
use courier_core::error::{
    AggregateNotificationFailure, BoxError, DispatchError, NotificationProcessorFailed, ProcessorKind,
    ResolveError,
};
use courier_core::handler::{GenericSubscriber, NotificationHandler, NotificationSubscriber};
use courier_core::middleware::NotificationInvoker;
use courier_core::notification::{Notification, NotificationEnvelope};
use courier_core::shape::{Shape, short_type_name};
use futures::future::{BoxFuture, FutureExt, join_all};
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use std::sync::{Arc, Weak};
use tokio_util::sync::CancellationToken;

/// How the processors of one publish are run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FanOutStrategy {
    /// One after another, in resolution order: handlers, then subscribers.
    #[default]
    Sequential,
    /// All at once on the publishing task.
    Concurrent,
}

/// A processor invoked with the type-erased envelope.
pub(crate) trait ErasedNotificationHandler: Send + Sync {
    fn invoke<'a>(
        &'a self,
        envelope: &'a NotificationEnvelope,
        cancel: CancellationToken,
    ) -> BoxFuture<'a, Result<(), BoxError>>;
}

fn payload_mismatch<N>(envelope: &NotificationEnvelope) -> BoxError {
    format!(
        "payload '{}' is not a '{}'",
        envelope.shape(),
        short_type_name::<N>()
    )
    .into()
}

pub(crate) struct HandlerAdapter<N: Notification> {
    handler: Arc<dyn NotificationHandler<N>>,
}

impl<N: Notification> HandlerAdapter<N> {
    pub(crate) fn new(handler: Arc<dyn NotificationHandler<N>>) -> Self {
        Self { handler }
    }
}

impl<N: Notification> ErasedNotificationHandler for HandlerAdapter<N> {
    fn invoke<'a>(
        &'a self,
        envelope: &'a NotificationEnvelope,
        cancel: CancellationToken,
    ) -> BoxFuture<'a, Result<(), BoxError>> {
        match envelope.downcast_ref::<N>() {
            Some(notification) => self.handler.handle(notification, cancel),
            None => futures::future::ready(Err(payload_mismatch::<N>(envelope))).boxed(),
        }
    }
}

struct SubscriberAdapter<N: Notification> {
    subscriber: Arc<dyn NotificationSubscriber<N>>,
}

impl<N: Notification> ErasedNotificationHandler for SubscriberAdapter<N> {
    fn invoke<'a>(
        &'a self,
        envelope: &'a NotificationEnvelope,
        cancel: CancellationToken,
    ) -> BoxFuture<'a, Result<(), BoxError>> {
        match envelope.downcast_ref::<N>() {
            Some(notification) => self.subscriber.on_notification(notification, cancel),
            None => futures::future::ready(Err(payload_mismatch::<N>(envelope))).boxed(),
        }
    }
}

struct GenericAdapter {
    subscriber: Arc<dyn GenericSubscriber>,
}

impl ErasedNotificationHandler for GenericAdapter {
    fn invoke<'a>(
        &'a self,
        envelope: &'a NotificationEnvelope,
        cancel: CancellationToken,
    ) -> BoxFuture<'a, Result<(), BoxError>> {
        self.subscriber.on_any(envelope, cancel)
    }
}

/// Weak handle to a manually subscribed listener.
pub(crate) trait SubscriberTarget: Send + Sync {
    /// Strong processor for one publish, if the listener is still alive.
    fn upgrade(&self) -> Option<Arc<dyn ErasedNotificationHandler>>;

    fn is_alive(&self) -> bool;
}

pub(crate) struct WeakSubscriber<N: Notification> {
    subscriber: Weak<dyn NotificationSubscriber<N>>,
    _shape: PhantomData<fn() -> N>,
}

impl<N: Notification> WeakSubscriber<N> {
    pub(crate) fn new(subscriber: Weak<dyn NotificationSubscriber<N>>) -> Self {
        Self {
            subscriber,
            _shape: PhantomData,
        }
    }
}

impl<N: Notification> SubscriberTarget for WeakSubscriber<N> {
    fn upgrade(&self) -> Option<Arc<dyn ErasedNotificationHandler>> {
        self.subscriber.upgrade().map(|subscriber| {
            Arc::new(SubscriberAdapter { subscriber }) as Arc<dyn ErasedNotificationHandler>
        })
    }

    fn is_alive(&self) -> bool {
        self.subscriber.strong_count() > 0
    }
}

pub(crate) struct WeakGeneric {
    subscriber: Weak<dyn GenericSubscriber>,
}

impl WeakGeneric {
    pub(crate) fn new(subscriber: Weak<dyn GenericSubscriber>) -> Self {
        Self { subscriber }
    }
}

impl SubscriberTarget for WeakGeneric {
    fn upgrade(&self) -> Option<Arc<dyn ErasedNotificationHandler>> {
        self.subscriber.upgrade().map(|subscriber| {
            Arc::new(GenericAdapter { subscriber }) as Arc<dyn ErasedNotificationHandler>
        })
    }

    fn is_alive(&self) -> bool {
        self.subscriber.strong_count() > 0
    }
}

/// One target of a publish.
pub(crate) enum NotificationProcessor {
    /// Registered handler; resolution failures surface as processor failures.
    AutomaticHandler {
        name: &'static str,
        target: Result<Arc<dyn ErasedNotificationHandler>, ResolveError>,
    },
    /// Live manual subscriber, typed or generic.
    ManualSubscriber {
        id: SubscriptionId,
        name: &'static str,
        generic: bool,
        target: Arc<dyn ErasedNotificationHandler>,
    },
}

impl NotificationProcessor {
    pub(crate) const fn name(&self) -> &'static str {
        match self {
            Self::AutomaticHandler { name, .. } | Self::ManualSubscriber { name, .. } => *name,
        }
    }

    pub(crate) const fn kind(&self) -> ProcessorKind {
        match self {
            Self::AutomaticHandler { .. } => ProcessorKind::AutomaticHandler,
            Self::ManualSubscriber { generic: false, .. } => ProcessorKind::ManualSubscriber,
            Self::ManualSubscriber { generic: true, .. } => ProcessorKind::GenericSubscriber,
        }
    }

    async fn invoke(
        &self,
        envelope: &NotificationEnvelope,
        cancel: CancellationToken,
    ) -> Result<(), NotificationProcessorFailed> {
        let outcome = match self {
            Self::AutomaticHandler { target: Ok(target), .. } => target.invoke(envelope, cancel).await,
            Self::AutomaticHandler { target: Err(error), .. } => Err(Box::new(error.clone()) as BoxError),
            Self::ManualSubscriber { id, target, .. } => {
                tracing::trace!(subscription = %id, "Invoking subscriber");
                target.invoke(envelope, cancel).await
            }
        };
        outcome.map_err(|source| NotificationProcessorFailed {
            processor: self.name(),
            kind: self.kind(),
            source,
        })
    }
}

/// Outcome of evaluating one middleware constraint against a capability set.
pub(crate) enum Verdict {
    Applies,
    NotSatisfied,
    EvaluationFailed(BoxError),
}

/// The single constraint evaluation shared by dispatch and the inspector.
pub(crate) fn evaluate_constraint(constraint: &CapabilityConstraint, capabilities: &CapabilitySet) -> Verdict {
    match constraint.evaluate(capabilities) {
        Ok(true) => Verdict::Applies,
        Ok(false) => Verdict::NotSatisfied,
        Err(error) => Verdict::EvaluationFailed(error),
    }
}

struct FanOut {
    failures: Vec<NotificationProcessorFailed>,
    not_started: usize,
}

impl FanOut {
    fn into_result(self, shape: Shape) -> Result<(), DispatchError> {
        for failure in &self.failures {
            DispatchMetrics::record_processor_failure(failure.kind);
        }
        if self.not_started > 0 {
            for failure in &self.failures {
                tracing::warn!(%shape, processor = failure.processor, error = %failure.source, "Processor failed before cancellation");
            }
            tracing::debug!(%shape, not_started = self.not_started, "Fan-out cancelled");
            return Err(DispatchError::Cancelled);
        }
        if self.failures.is_empty() {
            Ok(())
        } else {
            Err(AggregateNotificationFailure {
                shape,
                failures: self.failures,
            }
            .into())
        }
    }
}

async fn run_sequential(
    processors: &[NotificationProcessor],
    envelope: &NotificationEnvelope,
    cancel: &CancellationToken,
) -> FanOut {
    let mut failures = Vec::new();
    for (index, processor) in processors.iter().enumerate() {
        if cancel.is_cancelled() {
            return FanOut {
                failures,
                not_started: processors.len() - index,
            };
        }
        if let Err(failure) = processor.invoke(envelope, cancel.clone()).await {
            tracing::debug!(processor = failure.processor, error = %failure.source, "Notification processor failed");
            failures.push(failure);
        }
    }
    FanOut {
        failures,
        not_started: 0,
    }
}

async fn run_concurrent(
    processors: &[NotificationProcessor],
    envelope: &NotificationEnvelope,
    cancel: &CancellationToken,
) -> FanOut {
    if cancel.is_cancelled() {
        return FanOut {
            failures: Vec::new(),
            not_started: processors.len(),
        };
    }
    let outcomes = join_all(
        processors
            .iter()
            .map(|processor| processor.invoke(envelope, cancel.clone())),
    )
    .await;
    FanOut {
        failures: outcomes.into_iter().filter_map(Result::err).collect(),
        not_started: 0,
    }
}

/// Terminal step of the notification pipeline.
pub(crate) fn fan_out(
    shape: Shape,
    processors: Vec<NotificationProcessor>,
    strategy: FanOutStrategy,
) -> NotificationInvoker {
    let processors: Arc<[NotificationProcessor]> = processors.into();
    Arc::new(move |envelope: NotificationEnvelope, cancel: CancellationToken| {
        let processors = Arc::clone(&processors);
        async move {
            tracing::trace!(%shape, processors = processors.len(), ?strategy, "Fanning out");
            let outcome = match strategy {
                FanOutStrategy::Sequential => run_sequential(&processors, &envelope, &cancel).await,
                FanOutStrategy::Concurrent => run_concurrent(&processors, &envelope, &cancel).await,
            };
            outcome.into_result(shape)
        }
        .boxed()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Pinged;
    impl Notification for Pinged {}

    struct Record {
        label: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
        fail: bool,
    }

    impl NotificationHandler<Pinged> for Record {
        fn handle<'a>(&'a self, _notification: &'a Pinged, _cancel: CancellationToken) -> BoxFuture<'a, Result<(), BoxError>> {
            async move {
                self.log.lock().unwrap().push(self.label);
                if self.fail { Err(format!("{} failed", self.label).into()) } else { Ok(()) }
            }
            .boxed()
        }
    }

    fn processor(label: &'static str, log: &Arc<Mutex<Vec<&'static str>>>, fail: bool) -> NotificationProcessor {
        let handler: Arc<dyn NotificationHandler<Pinged>> = Arc::new(Record { label, log: Arc::clone(log), fail });
        NotificationProcessor::AutomaticHandler {
            name: label,
            target: Ok(Arc::new(HandlerAdapter::new(handler))),
        }
    }

    #[tokio::test]
    async fn test_every_processor_runs_and_failures_aggregate() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let processors = vec![
            processor("a", &log, true),
            processor("b", &log, false),
            processor("c", &log, true),
        ];
        let invoker = fan_out(Shape::of::<Pinged>(), processors, FanOutStrategy::Sequential);

        let error = invoker(NotificationEnvelope::new(Pinged), CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c"]);
        let failure = error.as_notification_failure().unwrap();
        assert_eq!(failure.processors(), vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_concurrent_fan_out_aggregates_single_failure() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let processors = vec![processor("a", &log, false), processor("b", &log, true)];
        let invoker = fan_out(Shape::of::<Pinged>(), processors, FanOutStrategy::Concurrent);

        let error = invoker(NotificationEnvelope::new(Pinged), CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(log.lock().unwrap().len(), 2);
        assert_eq!(error.as_notification_failure().unwrap().failures.len(), 1);
    }

    #[tokio::test]
    async fn test_unresolved_handler_is_a_processor_failure() {
        let processors = vec![NotificationProcessor::AutomaticHandler {
            name: "Broken",
            target: Err(ResolveError::Missing("Database")),
        }];
        let invoker = fan_out(Shape::of::<Pinged>(), processors, FanOutStrategy::Sequential);

        let error = invoker(NotificationEnvelope::new(Pinged), CancellationToken::new())
            .await
            .unwrap_err();

        let failure = error.as_notification_failure().unwrap();
        assert_eq!(failure.failures[0].kind, ProcessorKind::AutomaticHandler);
        assert!(failure.failures[0].source.to_string().contains("Database"));
    }

    #[tokio::test]
    async fn test_cancelled_fan_out_starts_nothing() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let invoker = fan_out(Shape::of::<Pinged>(), vec![processor("a", &log, false)], FanOutStrategy::Sequential);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let error = invoker(NotificationEnvelope::new(Pinged), cancel).await.unwrap_err();

        assert!(error.is_cancelled());
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_verdicts() {
        struct Audited;
        impl courier_core::capability::Capability for Audited {}

        let with = CapabilitySet::new().with::<Audited>();
        let constraint = CapabilityConstraint::requires::<Audited>();
        assert!(matches!(evaluate_constraint(&constraint, &with), Verdict::Applies));
        assert!(matches!(evaluate_constraint(&constraint, &CapabilitySet::new()), Verdict::NotSatisfied));

        let broken = CapabilityConstraint::custom("broken", |_| Err("nope".into()));
        assert!(matches!(evaluate_constraint(&broken, &with), Verdict::EvaluationFailed(_)));
    }
}
