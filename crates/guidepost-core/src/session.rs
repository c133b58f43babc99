//! One tour's working state: its groups, the guide directory, and the
//! optimistic mutations applied to them.
//!
//! Each mutation changes the local replica first, then persists through the
//! reconciler with three fallbacks: versioned update, direct update, and a
//! rewrite of the whole group collection. A failed persist is handled by the
//! context's rollback policy.

use tracing::{debug, info};

use crate::context::EngineContext;
use crate::error::EngineError;
use crate::groups::{
    move_participant, CollectionRewrite, DirectGroupWrite, GroupStore, GroupWrite, MoveOutcome, ParticipantWrite,
    VersionedGroupWrite,
};
use crate::guides::{assign_guide, GuideAssignment, GuideDirectory, GuideRef};
use crate::models::{Guide, Tour, TourGroup};
use crate::store::{fetch_as, fetch_one, Expand, Query, GUIDES, PARTICIPANTS, TOURS, TOUR_GROUPS};
use crate::sync::{EntityKey, EntityKind, Persisted, RollbackPolicy, Severity, SnapshotLedger, WritePlan};
use crate::tickets::{tour_ticket_need, TicketNeed};

/// Row patches for one group mutation, shared by the first two fallbacks.
struct GroupChange {
    label: String,
    participants: Vec<ParticipantWrite>,
    groups: Vec<GroupWrite>,
}

pub struct TourSession {
    ctx: EngineContext,
    tour: Tour,
    groups: GroupStore,
    directory: GuideDirectory,
    snapshots: SnapshotLedger<TourGroup>,
    resync_requested: bool,
}

impl TourSession {
    /// Fetch a tour with its groups and participants, and the guide directory.
    pub async fn load(ctx: EngineContext, tour_id: &str) -> Result<Self, EngineError> {
        let (tour, guides) = Self::fetch(&ctx, tour_id).await?;
        let mut session = Self {
            ctx,
            tour,
            groups: GroupStore::new(),
            directory: GuideDirectory::default(),
            snapshots: SnapshotLedger::new(),
            resync_requested: false,
        };
        session.install(guides);
        info!(tour_id, groups = session.groups.len(), "Tour session loaded");
        Ok(session)
    }

    async fn fetch(ctx: &EngineContext, tour_id: &str) -> Result<(Tour, Vec<Guide>), EngineError> {
        let store = ctx.store().as_ref();
        let tour_query = Query::table(TOURS)
            .expand(Expand::new(TOUR_GROUPS, "tour_id").with(Expand::new(PARTICIPANTS, "group_id")));
        let guide_query = Query::table(GUIDES);
        let (tour, guides) = futures::try_join!(
            fetch_one::<Tour>(store, tour_query, tour_id),
            fetch_as::<Guide>(store, &guide_query),
        )?;
        Ok((tour, guides))
    }

    fn install(&mut self, guides: Vec<Guide>) {
        let mut groups = std::mem::take(&mut self.tour.tour_groups);
        groups.sort_by(|a, b| a.entry_time.cmp(&b.entry_time).then_with(|| a.id.cmp(&b.id)));
        self.groups.load(groups);
        self.directory = GuideDirectory::new(guides);
    }

    /// Reload everything from storage, discarding local state and snapshots.
    pub async fn resync(&mut self) -> Result<(), EngineError> {
        let (tour, guides) = Self::fetch(&self.ctx, &self.tour.id).await?;
        self.tour = tour;
        self.install(guides);
        self.snapshots.clear();
        self.resync_requested = false;
        info!(tour_id = %self.tour.id, "Tour resynced");
        Ok(())
    }

    pub fn tour(&self) -> &Tour {
        &self.tour
    }

    pub fn groups(&self) -> &[TourGroup] {
        self.groups.groups()
    }

    fn group_at(&self, index: usize) -> Result<TourGroup, EngineError> {
        self.groups.group(index).cloned().ok_or(EngineError::InvalidGroupIndex {
            index,
            len: self.groups.len(),
        })
    }

    pub fn directory(&self) -> &GuideDirectory {
        &self.directory
    }

    pub fn is_dirty(&self) -> bool {
        !self.snapshots.dirty_keys().is_empty()
    }

    /// Groups whose local state may be ahead of storage.
    pub fn dirty_keys(&self) -> Vec<EntityKey> {
        self.snapshots.dirty_keys()
    }

    /// A write failed and local changes were kept.
    pub fn needs_resync(&self) -> bool {
        self.resync_requested
    }

    /// Tickets this tour needs at its venue.
    pub fn required_tickets(&self) -> TicketNeed {
        tour_ticket_need(self.groups.groups(), &self.tour.location, &self.directory, &self.ctx.venue_policy)
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    pub async fn move_participant(
        &mut self,
        participant_id: &str,
        from: usize,
        to: usize,
    ) -> Result<MoveOutcome, EngineError> {
        let before = self.groups.snapshot();
        let outcome = move_participant(&mut self.groups, participant_id, from, to)?;
        if outcome.is_noop() {
            return Ok(outcome);
        }

        let (source, target) = (self.group_at(from)?, self.group_at(to)?);
        let change = GroupChange {
            label: format!("move participant {}", participant_id),
            participants: vec![ParticipantWrite {
                id: participant_id.to_string(),
                expected_group: Some(source.id.clone()),
                patch: serde_json::json!({ "group_id": target.id }),
            }],
            groups: vec![GroupWrite::totals(&source), GroupWrite::totals(&target)],
        };
        let keys = vec![EntityKey::group(&source.id), EntityKey::group(&target.id)];
        let message = format!("Moved {} to Group {}", participant_id, to + 1);

        self.commit(change, &before, &keys, &message).await?;
        Ok(outcome)
    }

    /// Set a group's guide. A reference that maps to no guide clears it and
    /// raises a warning.
    pub async fn assign_guide(
        &mut self,
        group_index: usize,
        reference: &GuideRef,
    ) -> Result<GuideAssignment, EngineError> {
        let before = self.groups.snapshot();
        let assignment = assign_guide(&mut self.groups, group_index, reference, &self.tour, &self.directory)?;
        if assignment.resolution.is_unresolved() {
            self.ctx.notifier.notify(
                Severity::Warning,
                &format!("Could not map guide '{}'; {} has no guide", reference, assignment.group.name),
            );
        }

        let change = GroupChange {
            label: format!("assign guide to group {}", assignment.group.id),
            participants: Vec::new(),
            groups: vec![GroupWrite::guide(&assignment.group)],
        };
        let keys = vec![EntityKey::group(&assignment.group.id)];
        let message = format!("Updated {}", assignment.group.name);

        self.commit(change, &before, &keys, &message).await?;
        Ok(assignment)
    }

    /// Administrator correction of a participant's head-counts.
    pub async fn correct_counts(
        &mut self,
        participant_id: &str,
        count: u32,
        child_count: u32,
    ) -> Result<TourGroup, EngineError> {
        let before = self.groups.snapshot();
        let index = self.groups.correct_counts(participant_id, count, child_count)?;
        let group = self.group_at(index)?;

        let change = GroupChange {
            label: format!("correct counts of participant {}", participant_id),
            participants: vec![ParticipantWrite {
                id: participant_id.to_string(),
                expected_group: None,
                patch: serde_json::json!({ "count": count, "child_count": child_count }),
            }],
            groups: vec![GroupWrite::totals(&group)],
        };
        let keys = vec![EntityKey::group(&group.id)];
        let message = format!("Corrected counts for {}", participant_id);

        self.commit(change, &before, &keys, &message).await?;
        Ok(group)
    }

    /// Persist a change already applied locally. `before` is the group state
    /// prior to the change; `keys` are the groups it touched.
    async fn commit(
        &mut self,
        change: GroupChange,
        before: &[TourGroup],
        keys: &[EntityKey],
        message: &str,
    ) -> Result<Persisted, EngineError> {
        for key in keys {
            if let Some(group) = before.iter().find(|g| g.id == key.id) {
                self.snapshots.record(key.clone(), group.clone());
            }
        }
        self.ctx.reconciler.superseded(keys);

        let plan = WritePlan::new(change.label.clone())
            .then(VersionedGroupWrite {
                participants: change.participants.clone(),
                groups: change.groups.clone(),
            })
            .then(DirectGroupWrite {
                participants: change.participants,
                groups: change.groups,
            })
            .then(CollectionRewrite {
                tour_id: self.tour.id.clone(),
                groups: self.groups.snapshot(),
            })
            .invalidating(EntityKey::tour(&self.tour.id));

        match self.ctx.reconciler.persist(plan).await {
            Ok(persisted) => {
                for key in persisted.touched.iter().filter(|k| k.kind == EntityKind::TourGroup) {
                    if let Some(version) = persisted.version_of(key) {
                        self.groups.set_version(&key.id, version);
                    }
                    self.snapshots.settle(key);
                }
                debug!(label = %change.label, strategy = persisted.strategy, "Group change settled");
                self.ctx.notifier.notify(Severity::Success, message);
                Ok(persisted)
            }
            Err(e) => {
                self.on_failure(keys, &change.label);
                Err(e)
            }
        }
    }

    fn on_failure(&mut self, keys: &[EntityKey], label: &str) {
        match self.ctx.rollback {
            RollbackPolicy::RestoreSnapshot => {
                for key in keys {
                    if let Some(snapshot) = self.snapshots.settle(key) {
                        self.groups.restore(snapshot);
                    }
                }
                self.ctx
                    .notifier
                    .notify(Severity::Error, &format!("Could not save {}; the change was undone", label));
            }
            RollbackPolicy::LeaveStanding => {
                self.resync_requested = true;
                self.ctx.notifier.notify(
                    Severity::Warning,
                    &format!("Could not save {}; local changes kept until the next resync", label),
                );
            }
        }
    }
}
