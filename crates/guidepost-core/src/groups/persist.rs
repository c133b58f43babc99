//! Write strategies for group and participant changes.
//!
//! Plans run these in order: a versioned update that refuses to overwrite a
//! newer stored row, a direct update by id, and finally a rewrite of the
//! whole tour's group collection from local state. The two fallbacks write
//! one past the higher of the read and stored versions, so a group's counter
//! only ever moves forward.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::models::TourGroup;
use crate::store::{
    next_version, stored_version, update_versioned, Filter, RecordStore, StoreError, PARTICIPANTS, TOUR_GROUPS,
};
use crate::sync::{EntityKey, WriteStrategy, Written};

/// Patch for one participant row.
#[derive(Debug, Clone, PartialEq)]
pub struct ParticipantWrite {
    pub id: String,
    /// Owning group the row must still have for the versioned path.
    pub expected_group: Option<String>,
    pub patch: Value,
}

/// Patch for one group row, with the version it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupWrite {
    pub id: String,
    pub read_version: u64,
    pub patch: Value,
}

impl GroupWrite {
    /// Cached totals of a group as they stand locally.
    pub fn totals(group: &TourGroup) -> Self {
        Self {
            id: group.id.clone(),
            read_version: group.version,
            patch: json!({ "size": group.size, "child_count": group.child_count }),
        }
    }

    pub fn guide(group: &TourGroup) -> Self {
        Self {
            id: group.id.clone(),
            read_version: group.version,
            patch: json!({ "guide_id": group.guide_id, "name": group.name }),
        }
    }
}

fn touched(participants: &[ParticipantWrite], groups: &[GroupWrite]) -> Vec<EntityKey> {
    participants
        .iter()
        .map(|p| EntityKey::participant(&p.id))
        .chain(groups.iter().map(|g| EntityKey::group(&g.id)))
        .collect()
}

// ============================================================================
// Versioned update
// ============================================================================

/// Compare-and-swap writes: participants must still sit in the expected
/// group and groups must still be at the version they were read at.
pub struct VersionedGroupWrite {
    pub participants: Vec<ParticipantWrite>,
    pub groups: Vec<GroupWrite>,
}

#[async_trait]
impl WriteStrategy for VersionedGroupWrite {
    fn name(&self) -> &'static str {
        "versioned_update"
    }

    fn touches(&self) -> Vec<EntityKey> {
        touched(&self.participants, &self.groups)
    }

    async fn write(&self, store: &dyn RecordStore) -> Result<Written, StoreError> {
        for p in &self.participants {
            let mut filter = Filter::by_id(&p.id);
            if let Some(ref expected) = p.expected_group {
                filter = filter.eq("group_id", expected.as_str());
            }
            if store.update(PARTICIPANTS, &filter, p.patch.clone()).await? == 0 {
                // A retry after a lost response finds the row already written.
                let target = p.patch.get("group_id").cloned().unwrap_or(Value::Null);
                let done = !target.is_null()
                    && store
                        .count(PARTICIPANTS, &Filter::by_id(&p.id).eq("group_id", target))
                        .await?
                        > 0;
                if !done {
                    return Err(StoreError::VersionConflict {
                        table: PARTICIPANTS.to_string(),
                        id: p.id.clone(),
                    });
                }
                debug!(participant_id = %p.id, "Participant already in target group");
            }
        }
        let mut written = Vec::with_capacity(self.groups.len());
        for g in &self.groups {
            let version = update_versioned(store, TOUR_GROUPS, &g.id, g.read_version, g.patch.clone()).await?;
            written.push((EntityKey::group(&g.id), version));
        }
        Ok(written)
    }
}

// ============================================================================
// Direct update
// ============================================================================

/// Same patches keyed by id only. Last writer wins on content.
pub struct DirectGroupWrite {
    pub participants: Vec<ParticipantWrite>,
    pub groups: Vec<GroupWrite>,
}

#[async_trait]
impl WriteStrategy for DirectGroupWrite {
    fn name(&self) -> &'static str {
        "direct_update"
    }

    fn touches(&self) -> Vec<EntityKey> {
        touched(&self.participants, &self.groups)
    }

    async fn write(&self, store: &dyn RecordStore) -> Result<Written, StoreError> {
        for p in &self.participants {
            if store.update(PARTICIPANTS, &Filter::by_id(&p.id), p.patch.clone()).await? == 0 {
                return Err(StoreError::NotFound(format!("{} {}", PARTICIPANTS, p.id)));
            }
        }
        let mut written = Vec::with_capacity(self.groups.len());
        for g in &self.groups {
            let not_found = || StoreError::NotFound(format!("{} {}", TOUR_GROUPS, g.id));
            let stored = stored_version(store, TOUR_GROUPS, &g.id).await?.ok_or_else(not_found)?;
            let version = next_version(g.read_version, Some(stored));
            let mut patch = g.patch.clone();
            if let Value::Object(ref mut map) = patch {
                map.insert("version".to_string(), Value::from(version));
            }
            if store.update(TOUR_GROUPS, &Filter::by_id(&g.id), patch).await? == 0 {
                return Err(not_found());
            }
            written.push((EntityKey::group(&g.id), version));
        }
        Ok(written)
    }
}

// ============================================================================
// Collection rewrite
// ============================================================================

/// Rewrite every group of the tour and every participant's owner and counts
/// from local state, inserting rows that storage lost.
pub struct CollectionRewrite {
    pub tour_id: String,
    pub groups: Vec<TourGroup>,
}

#[async_trait]
impl WriteStrategy for CollectionRewrite {
    fn name(&self) -> &'static str {
        "collection_rewrite"
    }

    fn touches(&self) -> Vec<EntityKey> {
        self.groups.iter().map(|g| EntityKey::group(&g.id)).collect()
    }

    async fn write(&self, store: &dyn RecordStore) -> Result<Written, StoreError> {
        let mut written = Vec::with_capacity(self.groups.len());
        for group in &self.groups {
            let stored = stored_version(store, TOUR_GROUPS, &group.id).await?;
            let version = next_version(group.version, stored);
            let mut row = group.row();
            if let Value::Object(ref mut map) = row {
                map.insert("version".to_string(), Value::from(version));
            }
            if stored.is_none() || store.update(TOUR_GROUPS, &Filter::by_id(&group.id), row.clone()).await? == 0 {
                debug!(group_id = %group.id, tour_id = %self.tour_id, "Group row missing, inserting");
                store.insert(TOUR_GROUPS, row).await?;
            }
            written.push((EntityKey::group(&group.id), version));

            for p in &group.participants {
                let patch = json!({
                    "group_id": group.id,
                    "count": p.count,
                    "child_count": p.child_count,
                });
                if store.update(PARTICIPANTS, &Filter::by_id(&p.id), patch).await? == 0 {
                    store.insert(PARTICIPANTS, serde_json::to_value(p)?).await?;
                }
            }
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::groups::store::fixtures::{group, participant};
    use crate::store::{MemoryStore, Query};

    fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        store.seed(TOUR_GROUPS, vec![
            json!({"id": "g1", "tour_id": "t1", "name": "Group 1", "size": 4, "child_count": 1, "version": 2}),
            json!({"id": "g2", "tour_id": "t1", "name": "Group 2", "size": 0, "child_count": 0, "version": 0}),
        ]);
        store.seed(PARTICIPANTS, vec![
            json!({"id": "p1", "name": "A", "count": 4, "child_count": 1, "group_id": "g1"}),
        ]);
        store
    }

    fn move_writes() -> (Vec<ParticipantWrite>, Vec<GroupWrite>) {
        (
            vec![ParticipantWrite {
                id: "p1".into(),
                expected_group: Some("g1".into()),
                patch: json!({"group_id": "g2"}),
            }],
            vec![
                GroupWrite { id: "g1".into(), read_version: 2, patch: json!({"size": 0, "child_count": 0}) },
                GroupWrite { id: "g2".into(), read_version: 0, patch: json!({"size": 4, "child_count": 1}) },
            ],
        )
    }

    #[tokio::test]
    async fn test_versioned_write() {
        let store = seeded();
        let (participants, groups) = move_writes();
        let written = VersionedGroupWrite { participants, groups }.write(&store).await.unwrap();
        assert_eq!(written, vec![(EntityKey::group("g1"), 3), (EntityKey::group("g2"), 1)]);

        let rows = store.rows(TOUR_GROUPS);
        assert_eq!(rows[0]["version"], 3);
        assert_eq!(rows[0]["size"], 0);
        assert_eq!(rows[1]["size"], 4);
        assert_eq!(store.rows(PARTICIPANTS)[0]["group_id"], "g2");
    }

    #[tokio::test]
    async fn test_versioned_write_is_repeatable_for_owner_change() {
        let store = seeded();
        store.update(PARTICIPANTS, &Filter::by_id("p1"), json!({"group_id": "g2"})).await.unwrap();
        let (participants, _) = move_writes();
        let strategy = VersionedGroupWrite { participants, groups: Vec::new() };
        assert!(strategy.write(&store).await.is_ok());
    }

    #[tokio::test]
    async fn test_versioned_write_conflicts_on_stale_version() {
        let store = seeded();
        store.update(TOUR_GROUPS, &Filter::by_id("g2"), json!({"version": 7})).await.unwrap();
        let (participants, groups) = move_writes();
        let err = VersionedGroupWrite { participants, groups }.write(&store).await.unwrap_err();
        assert!(err.is_version_conflict());
    }

    #[tokio::test]
    async fn test_direct_write_moves_version_forward() {
        let store = seeded();
        store.update(TOUR_GROUPS, &Filter::by_id("g2"), json!({"version": 7})).await.unwrap();
        let (participants, groups) = move_writes();
        let written = DirectGroupWrite { participants, groups }.write(&store).await.unwrap();
        assert_eq!(store.rows(TOUR_GROUPS)[1]["size"], 4);
        // Stored g2 was ahead of the read; the counter still moves forward.
        assert_eq!(store.rows(TOUR_GROUPS)[1]["version"], 8);
        assert_eq!(written[1], (EntityKey::group("g2"), 8));
        assert_eq!(written[0], (EntityKey::group("g1"), 3));
    }

    #[tokio::test]
    async fn test_collection_rewrite_keeps_newer_stored_version() {
        let store = seeded();
        store.update(TOUR_GROUPS, &Filter::by_id("g1"), json!({"version": 5})).await.unwrap();
        let mut g1 = group("g1", vec![participant("p1", 4, 1)]);
        g1.version = 2;
        g1.refresh_totals();

        let written = CollectionRewrite { tour_id: "t1".into(), groups: vec![g1] }.write(&store).await.unwrap();
        assert_eq!(written, vec![(EntityKey::group("g1"), 6)]);
        assert_eq!(store.rows(TOUR_GROUPS)[0]["version"], 6);
        assert_eq!(store.rows(TOUR_GROUPS).len(), 2);
    }

    #[tokio::test]
    async fn test_collection_rewrite_restores_missing_rows() {
        let store = MemoryStore::new();
        let mut g1 = group("g1", Vec::new());
        let mut g2 = group("g2", vec![participant("p1", 4, 1)]);
        g1.refresh_totals();
        g2.refresh_totals();

        let strategy = CollectionRewrite { tour_id: "t1".into(), groups: vec![g1, g2] };
        strategy.write(&store).await.unwrap();

        let query = Query::table(TOUR_GROUPS).filter(Filter::by_id("g2"));
        let rows = store.fetch(&query).await.unwrap();
        assert_eq!(rows[0]["size"], 4);
        assert_eq!(rows[0]["version"], 1);
        assert_eq!(store.rows(PARTICIPANTS)[0]["group_id"], "g2");
        assert_eq!(strategy.touches().len(), 2);
    }
}
