//! Statistics tracker: global and per-session dispatch counters.
//!
//! Global counters live for the process. Session counters are created lazily
//! on the first dispatch observed for a session and evicted once idle.
//!
//! Counters are kept in [`DashMap`]s. A session entry is mutated while its
//! shard's write guard is held, and eviction goes through
//! [`DashMap::retain`], which takes the same guards, so an eviction never
//! observes a half-applied update.

use crate::metrics::TrackerMetrics;
use crate::pipeline::{PipelineExecutionRecord, PipelineKind};
use chrono::{DateTime, TimeDelta, Utc};
use courier_core::environment::Clock;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Identifier of a caller session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    /// Wrap a session identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Counter {
    Request,
    Notification,
}

/// Shape-name counters for one scope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatisticsSnapshot {
    /// Requests (including stream requests) per shape
    pub requests: BTreeMap<&'static str, u64>,
    /// Notifications per shape
    pub notifications: BTreeMap<&'static str, u64>,
}

impl StatisticsSnapshot {
    /// Requests observed for `shape`.
    #[must_use]
    pub fn request_count(&self, shape: &str) -> u64 {
        self.requests.get(shape).copied().unwrap_or(0)
    }

    /// Notifications observed for `shape`.
    #[must_use]
    pub fn notification_count(&self, shape: &str) -> u64 {
        self.notifications.get(shape).copied().unwrap_or(0)
    }

    /// All requests in this scope.
    #[must_use]
    pub fn total_requests(&self) -> u64 {
        self.requests.values().sum()
    }

    /// All notifications in this scope.
    #[must_use]
    pub fn total_notifications(&self) -> u64 {
        self.notifications.values().sum()
    }
}

/// Counters of one session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    /// The session
    pub session: SessionId,
    /// First dispatch observed
    pub created_at: DateTime<Utc>,
    /// Latest dispatch observed
    pub last_activity: DateTime<Utc>,
    /// Counters
    pub counts: StatisticsSnapshot,
}

#[derive(Debug)]
struct SessionEntry {
    created_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
    requests: HashMap<&'static str, u64>,
    notifications: HashMap<&'static str, u64>,
}

impl SessionEntry {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            created_at: now,
            last_activity: now,
            requests: HashMap::new(),
            notifications: HashMap::new(),
        }
    }

    fn count(&mut self, counter: Counter, shape: &'static str, now: DateTime<Utc>) {
        let counts = match counter {
            Counter::Request => &mut self.requests,
            Counter::Notification => &mut self.notifications,
        };
        *counts.entry(shape).or_insert(0) += 1;
        self.last_activity = now;
    }

    fn snapshot(&self, session: SessionId) -> SessionSnapshot {
        SessionSnapshot {
            session,
            created_at: self.created_at,
            last_activity: self.last_activity,
            counts: StatisticsSnapshot {
                requests: self.requests.iter().map(|(k, v)| (*k, *v)).collect(),
                notifications: self.notifications.iter().map(|(k, v)| (*k, *v)).collect(),
            },
        }
    }
}

/// Concurrent invocation counters.
pub struct StatisticsTracker {
    requests: DashMap<&'static str, u64>,
    notifications: DashMap<&'static str, u64>,
    sessions: DashMap<SessionId, SessionEntry>,
    clock: Arc<dyn Clock>,
}

impl StatisticsTracker {
    /// Empty tracker reading time from `clock`.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            requests: DashMap::new(),
            notifications: DashMap::new(),
            sessions: DashMap::new(),
            clock,
        }
    }

    /// Count a request dispatch of `shape`.
    pub fn record_request(&self, session: Option<&SessionId>, shape: &'static str) {
        self.record(Counter::Request, session, shape);
    }

    /// Count a publish of `shape`.
    pub fn record_notification(&self, session: Option<&SessionId>, shape: &'static str) {
        self.record(Counter::Notification, session, shape);
    }

    /// Count a finished dispatch from its execution record.
    pub fn record_execution(&self, session: Option<&SessionId>, record: &PipelineExecutionRecord) {
        let counter = match record.pipeline {
            PipelineKind::Request(_) | PipelineKind::Stream(_) => Counter::Request,
            PipelineKind::Notification => Counter::Notification,
        };
        self.record(counter, session, record.shape.name());
    }

    fn record(&self, counter: Counter, session: Option<&SessionId>, shape: &'static str) {
        let global = match counter {
            Counter::Request => &self.requests,
            Counter::Notification => &self.notifications,
        };
        *global.entry(shape).or_insert(0) += 1;

        if let Some(session) = session {
            let now = self.clock.now();
            self.sessions
                .entry(session.clone())
                .or_insert_with(|| SessionEntry::new(now))
                .count(counter, shape, now);
        }
    }

    /// Process-wide counters.
    #[must_use]
    pub fn snapshot_global(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            requests: self.requests.iter().map(|e| (*e.key(), *e.value())).collect(),
            notifications: self.notifications.iter().map(|e| (*e.key(), *e.value())).collect(),
        }
    }

    /// Counters of one session, if it is tracked.
    #[must_use]
    pub fn snapshot_session(&self, session: &SessionId) -> Option<SessionSnapshot> {
        self.sessions
            .get(session)
            .map(|entry| entry.snapshot(session.clone()))
    }

    /// Tracked sessions, sorted.
    #[must_use]
    pub fn list_active_sessions(&self) -> Vec<SessionId> {
        let mut sessions: Vec<SessionId> = self.sessions.iter().map(|e| e.key().clone()).collect();
        sessions.sort();
        sessions
    }

    /// Remove sessions idle for at least `idle_timeout`. Returns how many were removed.
    pub fn evict_idle_sessions(&self, idle_timeout: Duration) -> usize {
        let Ok(idle_timeout) = TimeDelta::from_std(idle_timeout) else {
            tracing::warn!("Idle timeout out of range; nothing evicted");
            return 0;
        };
        let now = self.clock.now();
        let mut evicted = 0;
        self.sessions.retain(|_, entry| {
            let keep = now.signed_duration_since(entry.last_activity) < idle_timeout;
            if !keep {
                evicted += 1;
            }
            keep
        });

        TrackerMetrics::record_active_sessions(self.sessions.len());
        if evicted > 0 {
            TrackerMetrics::record_sessions_evicted(evicted);
            tracing::debug!(evicted, "Evicted idle sessions");
        }
        evicted
    }

    /// Clear every counter and session.
    pub fn reset(&self) {
        self.requests.clear();
        self.notifications.clear();
        self.sessions.clear();
    }

    /// Evict idle sessions every `interval` until `shutdown` fires.
    ///
    /// Intervals below one millisecond are raised to one millisecond.
    pub fn spawn_idle_eviction(
        self: &Arc<Self>,
        idle_timeout: Duration,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        tracker.evict_idle_sessions(idle_timeout);
                    }
                }
            }
            tracing::debug!("Idle session eviction stopped");
        })
    }
}

impl fmt::Debug for StatisticsTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatisticsTracker")
            .field("sessions", &self.sessions.len())
            .finish_non_exhaustive()
    }
}
