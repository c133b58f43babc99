//! Ticket bucket allocation.
//!
//! The pure functions at the top decide whether a bucket can take or give
//! back a tour. [`BucketAllocator`] applies them to its local replica,
//! persists through the reconciler with versioned writes, and on a version
//! conflict refetches the bucket and decides again.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::models::{BucketDraft, TicketBucket, TourAllocation};
use crate::store::{fetch_as, fetch_one, update_versioned, Filter, Query, RecordStore, StoreError, TICKET_BUCKETS};
use crate::sync::{EntityKey, Reconciler, RollbackPolicy, SnapshotLedger, WritePlan, WriteStrategy, Written};

/// Refetch-and-retry rounds after a version conflict.
pub const MAX_CONFLICT_REFETCHES: u32 = 3;

// ============================================================================
// Pure allocation rules
// ============================================================================

/// Reject a duplicate assignment or one the bucket cannot cover.
pub fn check_assign(bucket: &TicketBucket, tour_id: &str, required: u32) -> Result<(), EngineError> {
    if bucket.is_assigned(tour_id) {
        return Err(EngineError::DuplicateAssignment {
            bucket_id: bucket.id.clone(),
            tour_id: tour_id.to_string(),
        });
    }
    let remaining = bucket.remaining();
    if remaining < required {
        return Err(EngineError::InsufficientCapacity {
            bucket_id: bucket.id.clone(),
            remaining,
            required,
        });
    }
    Ok(())
}

/// Charge `required` tickets to `tour_id`. Leaves the bucket untouched on error.
pub fn apply_assign(bucket: &mut TicketBucket, tour_id: &str, required: u32) -> Result<(), EngineError> {
    check_assign(bucket, tour_id, required)?;
    bucket.allocated_tickets += required;
    bucket.assigned_tours.push(TourAllocation {
        tour_id: tour_id.to_string(),
        tickets: required,
    });
    Ok(())
}

/// Give back the tickets charged to `tour_id`. Returns the amount released.
pub fn apply_release(bucket: &mut TicketBucket, tour_id: &str) -> Result<u32, EngineError> {
    let position = bucket
        .assigned_tours
        .iter()
        .position(|a| a.tour_id == tour_id)
        .ok_or_else(|| EngineError::NotAssigned {
            bucket_id: bucket.id.clone(),
            tour_id: tour_id.to_string(),
        })?;
    let allocation = bucket.assigned_tours.remove(position);
    bucket.allocated_tickets = bucket.allocated_tickets.saturating_sub(allocation.tickets);
    Ok(allocation.tickets)
}

/// Buckets dated `date` that can take `required` more tickets and do not
/// already serve `tour_id`, tightest fit first.
pub fn candidate_buckets<'a>(
    buckets: impl IntoIterator<Item = &'a TicketBucket>,
    date: NaiveDate,
    tour_id: &str,
    required: u32,
) -> Vec<&'a TicketBucket> {
    let mut candidates: Vec<&TicketBucket> = buckets
        .into_iter()
        .filter(|b| b.date == date && !b.is_assigned(tour_id) && b.remaining() >= required)
        .collect();
    candidates.sort_by(|a, b| {
        a.remaining()
            .cmp(&b.remaining())
            .then_with(|| a.reference.cmp(&b.reference))
    });
    candidates
}

fn allocation_patch(bucket: &TicketBucket) -> Value {
    json!({
        "allocated_tickets": bucket.allocated_tickets,
        "assigned_tours": bucket.assigned_tours,
    })
}

fn metadata_patch(draft: &BucketDraft) -> Value {
    json!({
        "reference": draft.reference,
        "date": draft.date,
        "bucket_type": draft.bucket_type,
        "max_tickets": draft.max_tickets,
        "access_time": draft.access_time,
    })
}

// ============================================================================
// Write strategies
// ============================================================================

/// Versioned patch of one bucket row.
struct BucketWrite {
    bucket_id: String,
    read_version: u64,
    patch: Value,
}

#[async_trait]
impl WriteStrategy for BucketWrite {
    fn name(&self) -> &'static str {
        "versioned_update"
    }

    fn touches(&self) -> Vec<EntityKey> {
        vec![EntityKey::bucket(&self.bucket_id)]
    }

    async fn write(&self, store: &dyn RecordStore) -> Result<Written, StoreError> {
        let version =
            update_versioned(store, TICKET_BUCKETS, &self.bucket_id, self.read_version, self.patch.clone()).await?;
        Ok(vec![(EntityKey::bucket(&self.bucket_id), version)])
    }
}

/// Delete a bucket row only if it is still at the version it was read at.
struct BucketDelete {
    bucket_id: String,
    read_version: u64,
}

#[async_trait]
impl WriteStrategy for BucketDelete {
    fn name(&self) -> &'static str {
        "versioned_delete"
    }

    fn touches(&self) -> Vec<EntityKey> {
        vec![EntityKey::bucket(&self.bucket_id)]
    }

    async fn write(&self, store: &dyn RecordStore) -> Result<Written, StoreError> {
        let filter = Filter::by_id(&self.bucket_id).eq("version", self.read_version);
        if store.delete(TICKET_BUCKETS, &filter).await? == 0 {
            // Gone already counts as deleted.
            if store.count(TICKET_BUCKETS, &Filter::by_id(&self.bucket_id)).await? > 0 {
                return Err(StoreError::VersionConflict {
                    table: TICKET_BUCKETS.to_string(),
                    id: self.bucket_id.clone(),
                });
            }
        }
        Ok(Vec::new())
    }
}

// ============================================================================
// Allocator
// ============================================================================

/// Which change to re-apply after a conflict refetch.
enum BucketChange<'a> {
    Assign { tour_id: &'a str, required: u32 },
    Release { tour_id: &'a str },
    Edit(&'a BucketDraft),
}

impl BucketChange<'_> {
    fn apply(&self, bucket: &mut TicketBucket) -> Result<Value, EngineError> {
        match self {
            BucketChange::Assign { tour_id, required } => {
                apply_assign(bucket, tour_id, *required)?;
                Ok(allocation_patch(bucket))
            }
            BucketChange::Release { tour_id } => {
                apply_release(bucket, tour_id)?;
                Ok(allocation_patch(bucket))
            }
            BucketChange::Edit(draft) => {
                if draft.reference.trim().is_empty() {
                    return Err(EngineError::MissingField("reference"));
                }
                if draft.max_tickets < bucket.allocated_tickets {
                    warn!(
                        bucket_id = %bucket.id,
                        max_tickets = draft.max_tickets,
                        allocated = bucket.allocated_tickets,
                        "Capacity set below allocated tickets"
                    );
                }
                bucket.reference = draft.reference.clone();
                bucket.date = draft.date;
                bucket.bucket_type = draft.bucket_type;
                bucket.max_tickets = draft.max_tickets;
                bucket.access_time = draft.access_time;
                Ok(metadata_patch(draft))
            }
        }
    }

    fn label(&self, bucket_id: &str) -> String {
        match self {
            BucketChange::Assign { tour_id, .. } => format!("assign tour {} to bucket {}", tour_id, bucket_id),
            BucketChange::Release { tour_id } => format!("release tour {} from bucket {}", tour_id, bucket_id),
            BucketChange::Edit(_) => format!("edit bucket {}", bucket_id),
        }
    }

    fn tour_id(&self) -> Option<&str> {
        match self {
            BucketChange::Assign { tour_id, .. } | BucketChange::Release { tour_id } => Some(tour_id),
            BucketChange::Edit(_) => None,
        }
    }
}

/// Local replica of ticket buckets with optimistic, versioned persistence.
pub struct BucketAllocator {
    reconciler: Arc<Reconciler>,
    rollback: RollbackPolicy,
    buckets: HashMap<String, TicketBucket>,
    snapshots: SnapshotLedger<TicketBucket>,
    resync_requested: bool,
}

impl BucketAllocator {
    pub fn new(reconciler: Arc<Reconciler>, rollback: RollbackPolicy) -> Self {
        Self {
            reconciler,
            rollback,
            buckets: HashMap::new(),
            snapshots: SnapshotLedger::new(),
            resync_requested: false,
        }
    }

    fn store(&self) -> &dyn RecordStore {
        self.reconciler.store().as_ref()
    }

    /// Fetch every bucket dated `date` into the replica, ordered by reference.
    pub async fn load_for_date(&mut self, date: NaiveDate) -> Result<Vec<TicketBucket>, EngineError> {
        let query = Query::table(TICKET_BUCKETS).filter(Filter::new().eq("date", date.to_string()));
        let mut fetched: Vec<TicketBucket> = fetch_as(self.store(), &query).await?;
        fetched.sort_by(|a, b| a.reference.cmp(&b.reference));

        for bucket in &fetched {
            if bucket.is_over_allocated() {
                warn!(bucket_id = %bucket.id, usage = %bucket.display_usage(), "Bucket is over-allocated");
            }
            self.buckets.insert(bucket.id.clone(), bucket.clone());
            self.reloaded(&bucket.id);
        }
        debug!(date = %date, count = fetched.len(), "Loaded ticket buckets");
        Ok(fetched)
    }

    /// Replace the replica's copy of one bucket with the stored row.
    pub async fn refresh(&mut self, bucket_id: &str) -> Result<TicketBucket, EngineError> {
        let bucket: TicketBucket = fetch_one(self.store(), Query::table(TICKET_BUCKETS), bucket_id).await?;
        self.buckets.insert(bucket.id.clone(), bucket.clone());
        self.reloaded(bucket_id);
        Ok(bucket)
    }

    /// The replica holds the stored row again. Once nothing is ahead of
    /// storage, no resync is owed.
    fn reloaded(&mut self, bucket_id: &str) {
        self.snapshots.settle(&EntityKey::bucket(bucket_id));
        if self.resync_requested && self.snapshots.dirty_keys().is_empty() {
            debug!(bucket_id, "Replica back in step with storage");
            self.resync_requested = false;
        }
    }

    pub fn cached(&self, bucket_id: &str) -> Option<&TicketBucket> {
        self.buckets.get(bucket_id)
    }

    async fn current(&mut self, bucket_id: &str) -> Result<TicketBucket, EngineError> {
        match self.buckets.get(bucket_id) {
            Some(bucket) => Ok(bucket.clone()),
            None => self.refresh(bucket_id).await,
        }
    }

    /// Buckets on `date` able to supply `required` tickets to `tour_id`.
    pub async fn candidates(
        &mut self,
        date: NaiveDate,
        tour_id: &str,
        required: u32,
    ) -> Result<Vec<TicketBucket>, EngineError> {
        self.load_for_date(date).await?;
        Ok(candidate_buckets(self.buckets.values(), date, tour_id, required)
            .into_iter()
            .cloned()
            .collect())
    }

    pub async fn assign(
        &mut self,
        bucket_id: &str,
        tour_id: &str,
        required: u32,
    ) -> Result<TicketBucket, EngineError> {
        self.apply(bucket_id, BucketChange::Assign { tour_id, required }).await
    }

    pub async fn release(&mut self, bucket_id: &str, tour_id: &str) -> Result<TicketBucket, EngineError> {
        self.apply(bucket_id, BucketChange::Release { tour_id }).await
    }

    /// Change metadata or capacity. Allocations are never touched.
    pub async fn edit_bucket(&mut self, bucket_id: &str, draft: &BucketDraft) -> Result<TicketBucket, EngineError> {
        self.apply(bucket_id, BucketChange::Edit(draft)).await
    }

    pub async fn create_bucket(&mut self, draft: &BucketDraft) -> Result<TicketBucket, EngineError> {
        if draft.reference.trim().is_empty() {
            return Err(EngineError::MissingField("reference"));
        }
        let mut row = metadata_patch(draft);
        if let Value::Object(ref mut map) = row {
            map.insert("allocated_tickets".to_string(), Value::from(0));
            map.insert("assigned_tours".to_string(), Value::Array(Vec::new()));
            map.insert("version".to_string(), Value::from(0));
        }
        let stored = self.store().insert(TICKET_BUCKETS, row).await?;
        let bucket: TicketBucket = serde_json::from_value(stored).map_err(StoreError::from)?;
        info!(bucket_id = %bucket.id, reference = %bucket.reference, "Bucket created");
        self.buckets.insert(bucket.id.clone(), bucket.clone());
        Ok(bucket)
    }

    /// Remove a bucket that no tour draws from.
    pub async fn delete_bucket(&mut self, bucket_id: &str) -> Result<(), EngineError> {
        let bucket = self.refresh(bucket_id).await?;
        if !bucket.assigned_tours.is_empty() {
            return Err(EngineError::BucketInUse {
                bucket_id: bucket.id.clone(),
                tours: bucket.assigned_tours.len(),
            });
        }
        let plan = WritePlan::new(format!("delete bucket {}", bucket_id)).then(BucketDelete {
            bucket_id: bucket.id.clone(),
            read_version: bucket.version,
        });
        self.reconciler.persist(plan).await?;
        self.buckets.remove(bucket_id);
        info!(bucket_id, "Bucket deleted");
        Ok(())
    }

    /// Buckets whose local state may be ahead of storage.
    pub fn dirty_buckets(&self) -> Vec<EntityKey> {
        self.snapshots.dirty_keys()
    }

    /// A write failed and local state was left standing.
    pub fn needs_resync(&self) -> bool {
        self.resync_requested
    }

    async fn apply(&mut self, bucket_id: &str, change: BucketChange<'_>) -> Result<TicketBucket, EngineError> {
        let key = EntityKey::bucket(bucket_id);
        let mut refetches = 0;

        loop {
            let before = self.current(bucket_id).await?;
            let mut after = before.clone();
            let patch = change.apply(&mut after)?;

            self.reconciler.superseded(std::slice::from_ref(&key));
            self.snapshots.record(key.clone(), before.clone());
            self.buckets.insert(bucket_id.to_string(), after.clone());

            let mut plan = WritePlan::new(change.label(bucket_id)).then(BucketWrite {
                bucket_id: bucket_id.to_string(),
                read_version: before.version,
                patch,
            });
            if let Some(tour_id) = change.tour_id() {
                plan = plan.invalidating(EntityKey::tour(tour_id));
            }

            match self.reconciler.persist(plan).await {
                Ok(persisted) => {
                    after.version = persisted.version_of(&key).unwrap_or(before.version + 1);
                    self.buckets.insert(bucket_id.to_string(), after.clone());
                    self.snapshots.settle(&key);
                    info!(bucket_id, usage = %after.display_usage(), "Bucket updated");
                    return Ok(after);
                }
                Err(e) if e.is_version_conflict() && refetches < MAX_CONFLICT_REFETCHES => {
                    refetches += 1;
                    warn!(bucket_id, attempt = refetches, "Bucket changed in storage, refetching");
                    self.refresh(bucket_id).await?;
                }
                Err(e) => {
                    self.on_failure(&key);
                    return Err(e);
                }
            }
        }
    }

    fn on_failure(&mut self, key: &EntityKey) {
        match self.rollback {
            RollbackPolicy::RestoreSnapshot => {
                if let Some(snapshot) = self.snapshots.settle(key) {
                    debug!(key = %key, "Restoring bucket snapshot");
                    self.buckets.insert(key.id.clone(), snapshot);
                }
            }
            RollbackPolicy::LeaveStanding => {
                self.resync_requested = true;
            }
        }
    }
}
