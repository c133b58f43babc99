use std::sync::Arc;

use crate::config::Config;
use crate::store::RecordStore;
use crate::sync::{CacheInvalidator, Notifier, Reconciler, RetryPolicy, RollbackPolicy};
use crate::tickets::{BucketAllocator, VenuePolicy};

/// Collaborators shared by every engine operation.
#[derive(Clone)]
pub struct EngineContext {
    pub reconciler: Arc<Reconciler>,
    pub notifier: Arc<dyn Notifier>,
    pub venue_policy: VenuePolicy,
    pub rollback: RollbackPolicy,
}

impl EngineContext {
    pub fn new(
        store: Arc<dyn RecordStore>,
        invalidator: Arc<dyn CacheInvalidator>,
        notifier: Arc<dyn Notifier>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            reconciler: Arc::new(Reconciler::new(store, retry, invalidator)),
            notifier,
            venue_policy: VenuePolicy::default(),
            rollback: RollbackPolicy::default(),
        }
    }

    pub fn from_config(
        config: &Config,
        store: Arc<dyn RecordStore>,
        invalidator: Arc<dyn CacheInvalidator>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self::new(store, invalidator, notifier, config.retry.clone())
            .with_venue_policy(config.venue_policy())
            .with_rollback(config.rollback)
    }

    pub fn with_venue_policy(mut self, policy: VenuePolicy) -> Self {
        self.venue_policy = policy;
        self
    }

    pub fn with_rollback(mut self, rollback: RollbackPolicy) -> Self {
        self.rollback = rollback;
        self
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        self.reconciler.store()
    }

    pub fn allocator(&self) -> BucketAllocator {
        BucketAllocator::new(Arc::clone(&self.reconciler), self.rollback)
    }
}
