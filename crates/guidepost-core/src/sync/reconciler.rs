//! Persistence reconciler.
//!
//! Every engine mutation is applied to the local replica first and then
//! handed here as a [`WritePlan`]: an ordered list of write strategies. Each
//! strategy is retried with backoff; the first to succeed wins and its
//! entities are invalidated in dependent caches. When all strategies fail the
//! caller gets [`EngineError::PersistenceExhausted`] and decides, through its
//! [`RollbackPolicy`], whether local state stands or is restored.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::retry::{retry_with_backoff, RetryPolicy};
use super::sinks::{CacheInvalidator, EntityKey};
use crate::error::EngineError;
use crate::store::{RecordStore, StoreError};

/// What to do with an optimistic update whose write could not be stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackPolicy {
    /// Keep local state and ask for a resync. Local may be ahead of storage.
    #[default]
    LeaveStanding,
    /// Restore the pre-mutation snapshot.
    RestoreSnapshot,
}

/// Version counters a strategy stored, per entity.
pub type Written = Vec<(EntityKey, u64)>;

/// One way of making a mutation durable.
#[async_trait]
pub trait WriteStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Entities written by this strategy.
    fn touches(&self) -> Vec<EntityKey>;

    async fn write(&self, store: &dyn RecordStore) -> Result<Written, StoreError>;
}

/// Ordered fallback strategies for one mutation.
pub struct WritePlan {
    label: String,
    strategies: Vec<Box<dyn WriteStrategy>>,
    also_invalidate: Vec<EntityKey>,
}

impl WritePlan {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            strategies: Vec::new(),
            also_invalidate: Vec::new(),
        }
    }

    pub fn then(mut self, strategy: impl WriteStrategy + 'static) -> Self {
        self.strategies.push(Box::new(strategy));
        self
    }

    /// Invalidate an extra cached view on success, e.g. the parent tour.
    pub fn invalidating(mut self, key: EntityKey) -> Self {
        self.also_invalidate.push(key);
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }
}

/// Result of a successful persist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Persisted {
    pub strategy: &'static str,
    /// Entities written plus extra invalidated views.
    pub touched: Vec<EntityKey>,
    pub versions: Written,
}

impl Persisted {
    /// Version the winning strategy stored for `key`, if it wrote one.
    pub fn version_of(&self, key: &EntityKey) -> Option<u64> {
        self.versions.iter().find(|(k, _)| k == key).map(|(_, v)| *v)
    }
}

pub struct Reconciler {
    store: Arc<dyn RecordStore>,
    retry: RetryPolicy,
    invalidator: Arc<dyn CacheInvalidator>,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn RecordStore>,
        retry: RetryPolicy,
        invalidator: Arc<dyn CacheInvalidator>,
    ) -> Self {
        Self {
            store,
            retry,
            invalidator,
        }
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// A newer optimistic update was applied to these entities; pending
    /// invalidations for them would clobber it.
    pub fn superseded(&self, keys: &[EntityKey]) {
        for key in keys {
            self.invalidator.cancel(key);
        }
    }

    pub async fn persist(&self, plan: WritePlan) -> Result<Persisted, EngineError> {
        let strategies = plan.strategies.len();
        let mut last_error = None;

        for (index, strategy) in plan.strategies.iter().enumerate() {
            let label = format!("{} via {}", plan.label, strategy.name());
            let store = self.store.as_ref();
            match retry_with_backoff(&self.retry, &label, || strategy.write(store)).await {
                Ok(versions) => {
                    let mut touched = strategy.touches();
                    for key in &plan.also_invalidate {
                        if !touched.contains(key) {
                            touched.push(key.clone());
                        }
                    }
                    for key in &touched {
                        self.invalidator.invalidate(key);
                    }
                    info!(label = %plan.label, strategy = strategy.name(), fallback = index, "Change persisted");
                    return Ok(Persisted {
                        strategy: strategy.name(),
                        touched,
                        versions,
                    });
                }
                Err(e) => {
                    warn!(label = %plan.label, strategy = strategy.name(), error = %e, "Write strategy failed");
                    last_error = Some(e);
                }
            }
        }

        let source = last_error
            .unwrap_or_else(|| StoreError::InvalidRequest(format!("no write strategies for {}", plan.label)));
        error!(label = %plan.label, strategies, error = %source, "All write strategies exhausted");
        Err(EngineError::PersistenceExhausted {
            label: plan.label,
            strategies,
            source,
        })
    }
}

// ============================================================================
// Snapshots
// ============================================================================

/// Pre-mutation copies of entities whose writes have not settled.
///
/// An entity with a snapshot is dirty: its local state may be ahead of
/// storage. The earliest snapshot is kept when mutations stack up, so a
/// restore always goes back to the last state known to be stored.
#[derive(Debug)]
pub struct SnapshotLedger<T> {
    entries: HashMap<EntityKey, T>,
}

impl<T> Default for SnapshotLedger<T> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<T> SnapshotLedger<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, key: EntityKey, snapshot: T) {
        if self.entries.contains_key(&key) {
            debug!(key = %key, "Entity already dirty, keeping earlier snapshot");
            return;
        }
        self.entries.insert(key, snapshot);
    }

    /// Mark clean and hand back the snapshot.
    pub fn settle(&mut self, key: &EntityKey) -> Option<T> {
        self.entries.remove(key)
    }

    pub fn is_dirty(&self, key: &EntityKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn dirty_keys(&self) -> Vec<EntityKey> {
        self.entries.keys().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Filter, MemoryStore};
    use crate::sync::sinks::testing::Recorder;
    use serde_json::json;

    struct Rename {
        name: &'static str,
        id: &'static str,
        value: &'static str,
    }

    #[async_trait]
    impl WriteStrategy for Rename {
        fn name(&self) -> &'static str {
            self.name
        }

        fn touches(&self) -> Vec<EntityKey> {
            vec![EntityKey::group(self.id)]
        }

        async fn write(&self, store: &dyn RecordStore) -> Result<Written, StoreError> {
            store
                .update("tour_groups", &Filter::by_id(self.id), json!({"name": self.value}))
                .await
                .map(|_| Vec::new())
        }
    }

    struct Conflicting;

    #[async_trait]
    impl WriteStrategy for Conflicting {
        fn name(&self) -> &'static str {
            "versioned"
        }

        fn touches(&self) -> Vec<EntityKey> {
            vec![EntityKey::group("g1")]
        }

        async fn write(&self, _store: &dyn RecordStore) -> Result<Written, StoreError> {
            Err(StoreError::VersionConflict {
                table: "tour_groups".into(),
                id: "g1".into(),
            })
        }
    }

    fn setup() -> (Arc<MemoryStore>, Arc<Recorder>, Reconciler) {
        let store = Arc::new(MemoryStore::new());
        store.seed("tour_groups", vec![json!({"id": "g1", "name": "Group 1"})]);
        let recorder = Arc::new(Recorder::default());
        let reconciler = Reconciler::new(store.clone(), RetryPolicy::immediate(3), recorder.clone());
        (store, recorder, reconciler)
    }

    #[tokio::test]
    async fn test_first_strategy_wins_and_invalidates() {
        let (store, recorder, reconciler) = setup();
        let plan = WritePlan::new("rename g1")
            .then(Rename { name: "direct", id: "g1", value: "Morning" })
            .invalidating(EntityKey::tour("t1"));

        let persisted = reconciler.persist(plan).await.unwrap();
        assert_eq!(persisted.strategy, "direct");
        assert_eq!(recorder.invalidated(), vec![EntityKey::group("g1"), EntityKey::tour("t1")]);
        assert_eq!(store.rows("tour_groups")[0]["name"], "Morning");
    }

    #[tokio::test]
    async fn test_falls_back_after_conflict() {
        let (_store, _recorder, reconciler) = setup();
        let plan = WritePlan::new("rename g1")
            .then(Conflicting)
            .then(Rename { name: "direct", id: "g1", value: "Morning" });
        assert_eq!(plan.strategy_names(), vec!["versioned", "direct"]);

        let persisted = reconciler.persist(plan).await.unwrap();
        assert_eq!(persisted.strategy, "direct");
    }

    #[tokio::test]
    async fn test_falls_back_after_retries_exhausted() {
        let (store, _recorder, reconciler) = setup();
        // First strategy uses up its three attempts, second succeeds.
        store.fail_writes("tour_groups", 3);
        let plan = WritePlan::new("rename g1")
            .then(Rename { name: "first", id: "g1", value: "A" })
            .then(Rename { name: "second", id: "g1", value: "B" });

        let persisted = reconciler.persist(plan).await.unwrap();
        assert_eq!(persisted.strategy, "second");
        assert_eq!(store.rows("tour_groups")[0]["name"], "B");
    }

    #[tokio::test]
    async fn test_exhausted_reports_last_error() {
        let (store, recorder, reconciler) = setup();
        store.fail_writes("tour_groups", 100);
        let plan = WritePlan::new("rename g1")
            .then(Rename { name: "first", id: "g1", value: "A" })
            .then(Rename { name: "second", id: "g1", value: "B" });

        let err = reconciler.persist(plan).await.unwrap_err();
        match err {
            EngineError::PersistenceExhausted { strategies, source, .. } => {
                assert_eq!(strategies, 2);
                assert!(matches!(source, StoreError::Unavailable(_)));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(recorder.invalidated().is_empty());
    }

    #[test]
    fn test_snapshot_ledger_keeps_earliest() {
        let mut ledger = SnapshotLedger::new();
        let key = EntityKey::bucket("b1");
        ledger.record(key.clone(), 1);
        ledger.record(key.clone(), 2);
        assert!(ledger.is_dirty(&key));
        assert_eq!(ledger.dirty_keys(), vec![key.clone()]);
        assert_eq!(ledger.settle(&key), Some(1));
        assert!(!ledger.is_dirty(&key));
        assert_eq!(ledger.settle(&key), None);
    }
}
