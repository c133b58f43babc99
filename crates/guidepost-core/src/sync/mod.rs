//! Persistence reconciliation.
//!
//! This module provides:
//! - `Reconciler`: the single gateway for durable writes, with ordered
//!   fallback strategies and exponential backoff
//! - `SnapshotLedger`: pre-mutation copies for rollback
//! - Notification and cache-invalidation sinks

pub mod reconciler;
pub mod retry;
pub mod sinks;

pub use reconciler::{Persisted, Reconciler, RollbackPolicy, SnapshotLedger, WritePlan, WriteStrategy, Written};
pub use retry::{retry_with_backoff, RetryPolicy};
pub use sinks::{
    CacheInvalidator, ChannelNotifier, EntityKey, EntityKind, InvalidationQueue, NoopInvalidator,
    Notification, Notifier, Severity, TracingNotifier,
};
