//! Subscriber tracker for manually subscribed notification listeners.
//!
//! Listeners are held through [`Weak`](std::sync::Weak) references, so a
//! subscription never keeps its listener alive. Each subscription also carries
//! an explicit liveness token, flipped by [`Subscription::unsubscribe`] or
//! the `untrack*` calls. Dead entries (token cleared or listener dropped) are
//! filtered out on every read and removed from storage by
//! [`SubscriberTracker::cleanup`].
//!
//! Storage is a [`DashMap`] keyed by notification shape, with one extra key
//! for "listens to everything" subscribers, so subscriptions for unrelated
//! shapes do not contend.

use crate::metrics::TrackerMetrics;
use crate::notification::{NotificationProcessor, SubscriberTarget, WeakGeneric, WeakSubscriber};
use chrono::{DateTime, Utc};
use courier_core::environment::Clock;
use courier_core::handler::{GenericSubscriber, NotificationSubscriber};
use courier_core::notification::Notification;
use courier_core::shape::{Shape, short_type_name};
use dashmap::DashMap;
use serde::Serialize;
use std::any::TypeId;
use std::fmt;
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

static NEXT_SUBSCRIPTION: AtomicU64 = AtomicU64::new(1);

/// Identity of one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    fn next() -> Self {
        Self(NEXT_SUBSCRIPTION.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Handle to an active subscription.
///
/// Dropping the handle does not unsubscribe; only [`unsubscribe`](Self::unsubscribe),
/// the mediator's `unsubscribe*` calls, or dropping the listener end it.
#[derive(Debug, Clone)]
pub struct Subscription {
    id: SubscriptionId,
    shape: Option<Shape>,
    active: Arc<AtomicBool>,
}

impl Subscription {
    /// The subscription id.
    #[must_use]
    pub const fn id(&self) -> SubscriptionId {
        self.id
    }

    /// The subscribed shape; `None` for generic subscriptions.
    #[must_use]
    pub const fn shape(&self) -> Option<Shape> {
        self.shape
    }

    /// End the subscription. Storage is reclaimed by the next cleanup.
    pub fn unsubscribe(&self) {
        self.active.store(false, Ordering::Release);
    }

    /// Whether the subscription has not been ended explicitly.
    ///
    /// A subscription whose listener was dropped still reports `true` here
    /// but is no longer delivered to.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

/// Diagnostic view of one live subscription.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriberInfo {
    /// Subscription id
    pub id: SubscriptionId,
    /// Listener type name
    pub subscriber: &'static str,
    /// Subscribed shape; `None` for generic subscriptions
    pub shape: Option<Shape>,
    /// When the subscription was made
    pub subscribed_at: DateTime<Utc>,
    /// Whether it receives every notification
    pub generic: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum SubscriptionKey {
    Shape(TypeId),
    Everything,
}

struct SubscriberEntry {
    id: SubscriptionId,
    name: &'static str,
    shape: Option<Shape>,
    subscribed_at: DateTime<Utc>,
    active: Arc<AtomicBool>,
    address: usize,
    target: Box<dyn SubscriberTarget>,
}

impl SubscriberEntry {
    fn is_live(&self) -> bool {
        self.active.load(Ordering::Acquire) && self.target.is_alive()
    }

    fn info(&self) -> SubscriberInfo {
        SubscriberInfo {
            id: self.id,
            subscriber: self.name,
            shape: self.shape,
            subscribed_at: self.subscribed_at,
            generic: self.shape.is_none(),
        }
    }

    fn subscription(&self) -> Subscription {
        Subscription {
            id: self.id,
            shape: self.shape,
            active: Arc::clone(&self.active),
        }
    }

    fn end(&self) {
        self.active.store(false, Ordering::Release);
    }
}

fn address_of<S: ?Sized>(subscriber: &Arc<S>) -> usize {
    Arc::as_ptr(subscriber).cast::<()>().addr()
}

/// Concurrent registry of manual subscriptions.
pub struct SubscriberTracker {
    entries: DashMap<SubscriptionKey, Vec<SubscriberEntry>>,
    clock: Arc<dyn Clock>,
}

impl SubscriberTracker {
    /// Empty tracker stamping subscriptions with `clock`.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    /// Subscribe `subscriber` to shape `N`.
    ///
    /// Subscribing an instance that is already live for `N` returns the
    /// existing subscription instead of delivering twice.
    pub fn track<N, S>(&self, subscriber: &Arc<S>) -> Subscription
    where
        N: Notification,
        S: NotificationSubscriber<N>,
    {
        let shape = Shape::of::<N>();
        let weak: Weak<S> = Arc::downgrade(subscriber);
        let weak: Weak<dyn NotificationSubscriber<N>> = weak;
        self.insert(
            SubscriptionKey::Shape(shape.type_id()),
            Some(shape),
            short_type_name::<S>(),
            address_of(subscriber),
            Box::new(WeakSubscriber::new(weak)),
        )
    }

    /// Subscribe `subscriber` to every notification.
    pub fn track_generic<S: GenericSubscriber>(&self, subscriber: &Arc<S>) -> Subscription {
        let weak: Weak<S> = Arc::downgrade(subscriber);
        let weak: Weak<dyn GenericSubscriber> = weak;
        self.insert(
            SubscriptionKey::Everything,
            None,
            short_type_name::<S>(),
            address_of(subscriber),
            Box::new(WeakGeneric::new(weak)),
        )
    }

    fn insert(
        &self,
        key: SubscriptionKey,
        shape: Option<Shape>,
        name: &'static str,
        address: usize,
        target: Box<dyn SubscriberTarget>,
    ) -> Subscription {
        let mut entries = self.entries.entry(key).or_default();
        if let Some(existing) = entries
            .iter()
            .find(|entry| entry.address == address && entry.is_live())
        {
            tracing::debug!(subscription = %existing.id, subscriber = name, "Already subscribed");
            return existing.subscription();
        }
        let entry = SubscriberEntry {
            id: SubscriptionId::next(),
            name,
            shape,
            subscribed_at: self.clock.now(),
            active: Arc::new(AtomicBool::new(true)),
            address,
            target,
        };
        tracing::debug!(subscription = %entry.id, subscriber = name, shape = ?shape.map(|s| s.name()), "Subscribed");
        let subscription = entry.subscription();
        entries.push(entry);
        subscription
    }

    fn remove_where(&self, key: SubscriptionKey, matches: impl Fn(&SubscriberEntry) -> bool) -> usize {
        let Some(mut entries) = self.entries.get_mut(&key) else {
            return 0;
        };
        let before = entries.len();
        entries.retain(|entry| {
            if matches(entry) {
                entry.end();
                false
            } else {
                true
            }
        });
        before - entries.len()
    }

    /// Remove `subscriber`'s subscription to `N`. Returns whether one existed.
    pub fn untrack<N, S>(&self, subscriber: &Arc<S>) -> bool
    where
        N: Notification,
        S: NotificationSubscriber<N>,
    {
        let address = address_of(subscriber);
        let removed = self.remove_where(SubscriptionKey::Shape(TypeId::of::<N>()), |entry| {
            entry.address == address && entry.is_live()
        });
        removed > 0
    }

    /// Remove `subscriber`'s generic subscription. Returns whether one existed.
    pub fn untrack_generic<S: GenericSubscriber>(&self, subscriber: &Arc<S>) -> bool {
        let address = address_of(subscriber);
        self.remove_where(SubscriptionKey::Everything, |entry| {
            entry.address == address && entry.is_live()
        }) > 0
    }

    /// Remove a subscription by id. Returns whether it existed.
    pub fn untrack_id(&self, id: SubscriptionId) -> bool {
        let keys: Vec<SubscriptionKey> = self.entries.iter().map(|entry| *entry.key()).collect();
        keys.into_iter()
            .any(|key| self.remove_where(key, |entry| entry.id == id) > 0)
    }

    /// Live subscriptions to `N`, typed ones only.
    #[must_use]
    pub fn active_subscribers<N: Notification>(&self) -> Vec<SubscriberInfo> {
        self.live_infos(SubscriptionKey::Shape(TypeId::of::<N>()))
    }

    /// Live generic subscriptions.
    #[must_use]
    pub fn generic_subscribers(&self) -> Vec<SubscriberInfo> {
        self.live_infos(SubscriptionKey::Everything)
    }

    fn live_infos(&self, key: SubscriptionKey) -> Vec<SubscriberInfo> {
        self.entries.get(&key).map_or_else(Vec::new, |entries| {
            entries
                .iter()
                .filter(|entry| entry.is_live())
                .map(SubscriberEntry::info)
                .collect()
        })
    }

    /// Number of live subscriptions across all shapes.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.entries
            .iter()
            .map(|entries| entries.iter().filter(|entry| entry.is_live()).count())
            .sum()
    }

    /// Snapshot of the processors a publish of `shape` should reach:
    /// typed subscribers first, then generic ones, each in subscription order.
    pub(crate) fn processors_for(&self, shape: Shape) -> Vec<NotificationProcessor> {
        let mut processors = self.snapshot(SubscriptionKey::Shape(shape.type_id()), false);
        processors.extend(self.snapshot(SubscriptionKey::Everything, true));
        processors
    }

    fn snapshot(&self, key: SubscriptionKey, generic: bool) -> Vec<NotificationProcessor> {
        let Some(entries) = self.entries.get(&key) else {
            return Vec::new();
        };
        entries
            .iter()
            .filter(|entry| entry.active.load(Ordering::Acquire))
            .filter_map(|entry| {
                entry.target.upgrade().map(|target| NotificationProcessor::ManualSubscriber {
                    id: entry.id,
                    name: entry.name,
                    generic,
                    target,
                })
            })
            .collect()
    }

    /// Drop dead entries and empty shape lists. Returns the number removed.
    pub fn cleanup(&self) -> usize {
        let mut removed = 0;
        self.entries.retain(|_, entries| {
            let before = entries.len();
            entries.retain(SubscriberEntry::is_live);
            removed += before - entries.len();
            !entries.is_empty()
        });
        if removed > 0 {
            TrackerMetrics::record_subscribers_pruned(removed);
            tracing::debug!(removed, "Pruned dead subscribers");
        }
        removed
    }
}

impl fmt::Debug for SubscriberTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberTracker")
            .field("shapes", &self.entries.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::environment::SystemClock;
    use courier_core::error::BoxError;
    use courier_core::notification::NotificationEnvelope;
    use futures::future::{BoxFuture, FutureExt};
    use tokio_util::sync::CancellationToken;

    struct Pinged;
    impl Notification for Pinged {}

    struct Listener;
    impl NotificationSubscriber<Pinged> for Listener {
        fn on_notification<'a>(&'a self, _notification: &'a Pinged, _cancel: CancellationToken) -> BoxFuture<'a, Result<(), BoxError>> {
            async { Ok(()) }.boxed()
        }
    }

    struct Everything;
    impl GenericSubscriber for Everything {
        fn on_any<'a>(&'a self, _envelope: &'a NotificationEnvelope, _cancel: CancellationToken) -> BoxFuture<'a, Result<(), BoxError>> {
            async { Ok(()) }.boxed()
        }
    }

    fn tracker() -> SubscriberTracker {
        SubscriberTracker::new(Arc::new(SystemClock))
    }

    #[test]
    fn test_dropped_listener_disappears_without_unsubscribe() {
        let tracker = tracker();
        let listener = Arc::new(Listener);
        tracker.track::<Pinged, _>(&listener);
        assert_eq!(tracker.active_subscribers::<Pinged>().len(), 1);

        drop(listener);

        assert!(tracker.active_subscribers::<Pinged>().is_empty());
        assert_eq!(tracker.cleanup(), 1);
        assert_eq!(tracker.cleanup(), 0);
    }

    #[test]
    fn test_subscribing_twice_is_idempotent() {
        let tracker = tracker();
        let listener = Arc::new(Listener);
        let first = tracker.track::<Pinged, _>(&listener);
        let second = tracker.track::<Pinged, _>(&listener);

        assert_eq!(first.id(), second.id());
        assert_eq!(tracker.subscriber_count(), 1);
    }

    #[test]
    fn test_handle_unsubscribe_ends_delivery() {
        let tracker = tracker();
        let listener = Arc::new(Listener);
        let subscription = tracker.track::<Pinged, _>(&listener);

        subscription.unsubscribe();

        assert!(!subscription.is_active());
        assert!(tracker.processors_for(Shape::of::<Pinged>()).is_empty());
    }

    #[test]
    fn test_untrack_by_instance_and_id() {
        let tracker = tracker();
        let listener = Arc::new(Listener);
        let everything = Arc::new(Everything);
        tracker.track::<Pinged, _>(&listener);
        let generic = tracker.track_generic(&everything);

        assert!(tracker.untrack::<Pinged, _>(&listener));
        assert!(!tracker.untrack::<Pinged, _>(&listener));
        assert!(tracker.untrack_id(generic.id()));
        assert!(!generic.is_active());
        assert_eq!(tracker.subscriber_count(), 0);
    }

    #[test]
    fn test_untrack_ignores_entries_of_dropped_listeners() {
        let tracker = tracker();
        let gone = Arc::new(Listener);
        tracker.track::<Pinged, _>(&gone);
        drop(gone);

        let newcomer = Arc::new(Listener);
        assert!(!tracker.untrack::<Pinged, _>(&newcomer));
        assert!(!tracker.untrack_generic(&Arc::new(Everything)));
        assert_eq!(tracker.cleanup(), 1);
    }

    #[test]
    fn test_processors_list_typed_before_generic() {
        let tracker = tracker();
        let everything = Arc::new(Everything);
        let listener = Arc::new(Listener);
        tracker.track_generic(&everything);
        tracker.track::<Pinged, _>(&listener);

        let kinds: Vec<_> = tracker
            .processors_for(Shape::of::<Pinged>())
            .iter()
            .map(NotificationProcessor::kind)
            .collect();

        assert_eq!(
            kinds,
            vec![
                courier_core::error::ProcessorKind::ManualSubscriber,
                courier_core::error::ProcessorKind::GenericSubscriber
            ]
        );
    }
}
