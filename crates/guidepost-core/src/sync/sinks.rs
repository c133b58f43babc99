//! Presentation collaborators: user notifications and cache invalidation.
//!
//! Both are fire-and-forget. Nothing here blocks the caller.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

// ============================================================================
// Notifications
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub severity: Severity,
    pub message: String,
}

pub trait Notifier: Send + Sync {
    fn notify(&self, severity: Severity, message: &str);
}

/// Writes notifications to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, severity: Severity, message: &str) {
        match severity {
            Severity::Success => info!(notification = %message),
            Severity::Warning => warn!(notification = %message),
            Severity::Error => error!(notification = %message),
        }
    }
}

/// Forwards notifications to a UI loop over a bounded channel.
/// A full or closed channel drops the message.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::Sender<Notification>,
}

impl ChannelNotifier {
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<Notification>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self { tx }, rx)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, severity: Severity, message: &str) {
        let notification = Notification {
            severity,
            message: message.to_string(),
        };
        if let Err(e) = self.tx.try_send(notification) {
            warn!(error = %e, "Dropping notification");
        }
    }
}

// ============================================================================
// Cache invalidation
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Tour,
    TourGroup,
    Participant,
    Guide,
    TicketBucket,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Tour => "tour",
            EntityKind::TourGroup => "tour_group",
            EntityKind::Participant => "participant",
            EntityKind::Guide => "guide",
            EntityKind::TicketBucket => "ticket_bucket",
        }
    }
}

/// `(entity kind, entity id)` pair naming one cached view.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityKey {
    pub kind: EntityKind,
    pub id: String,
}

impl EntityKey {
    pub fn new(kind: EntityKind, id: impl Into<String>) -> Self {
        Self { kind, id: id.into() }
    }

    pub fn tour(id: &str) -> Self {
        Self::new(EntityKind::Tour, id)
    }

    pub fn group(id: &str) -> Self {
        Self::new(EntityKind::TourGroup, id)
    }

    pub fn participant(id: &str) -> Self {
        Self::new(EntityKind::Participant, id)
    }

    pub fn bucket(id: &str) -> Self {
        Self::new(EntityKind::TicketBucket, id)
    }
}

impl std::fmt::Display for EntityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.id)
    }
}

pub trait CacheInvalidator: Send + Sync {
    fn invalidate(&self, key: &EntityKey);

    /// Drop a pending invalidation for `key`, if the sink defers them.
    fn cancel(&self, _key: &EntityKey) {}
}

/// Discards invalidations.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopInvalidator;

impl CacheInvalidator for NoopInvalidator {
    fn invalidate(&self, _key: &EntityKey) {}
}

/// Defers invalidations by a fixed delay on tokio tasks.
///
/// A newer optimistic update for a key cancels the pending invalidation so it
/// cannot clobber the fresher local state. Must be used from within a tokio
/// runtime.
pub struct InvalidationQueue {
    inner: Arc<dyn CacheInvalidator>,
    delay: Duration,
    pending: Mutex<HashMap<EntityKey, JoinHandle<()>>>,
}

impl InvalidationQueue {
    pub fn new(inner: Arc<dyn CacheInvalidator>, delay: Duration) -> Self {
        Self {
            inner,
            delay,
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn schedule(&self, key: EntityKey) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.retain(|_, handle| !handle.is_finished());
        if let Some(previous) = pending.remove(&key) {
            previous.abort();
        }

        let inner = Arc::clone(&self.inner);
        let delay = self.delay;
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            debug!(key = %task_key, "Invalidating cached view");
            inner.invalidate(&task_key);
        });
        pending.insert(key, handle);
    }

    /// Number of invalidations still waiting to fire.
    pub fn pending_count(&self) -> usize {
        let pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.values().filter(|h| !h.is_finished()).count()
    }

    /// Fire every pending invalidation now. Used before shutdown.
    pub fn flush(&self) {
        let drained: Vec<(EntityKey, JoinHandle<()>)> = {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            pending.drain().collect()
        };
        for (key, handle) in drained {
            if handle.is_finished() {
                continue;
            }
            handle.abort();
            self.inner.invalidate(&key);
        }
    }
}

impl CacheInvalidator for InvalidationQueue {
    fn invalidate(&self, key: &EntityKey) {
        self.schedule(key.clone());
    }

    fn cancel(&self, key: &EntityKey) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = pending.remove(key) {
            debug!(key = %key, "Cancelling pending invalidation");
            handle.abort();
        }
    }
}

impl Drop for InvalidationQueue {
    fn drop(&mut self) {
        let pending = self.pending.get_mut().unwrap_or_else(|e| e.into_inner());
        for (_, handle) in pending.drain() {
            handle.abort();
        }
    }
}
