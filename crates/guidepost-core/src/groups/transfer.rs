//! Moving a participant between groups.
//!
//! Selection and drag gestures both end up here; this is the only path that
//! changes a participant's owning group.

use tracing::debug;

use super::store::GroupStore;
use crate::error::EngineError;
use crate::models::{Participant, TourGroup};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveOutcome {
    /// Source and destination were the same group; nothing changed.
    NoOp,
    Moved {
        participant: Participant,
        from: usize,
        to: usize,
        groups: Vec<TourGroup>,
    },
}

impl MoveOutcome {
    pub fn is_noop(&self) -> bool {
        matches!(self, MoveOutcome::NoOp)
    }
}

/// Move one participant from group `from` to group `to`.
///
/// Both indices and the participant's presence in `from` are checked before
/// anything changes. Both groups' totals are refreshed from their rosters.
pub fn move_participant(
    store: &mut GroupStore,
    participant_id: &str,
    from: usize,
    to: usize,
) -> Result<MoveOutcome, EngineError> {
    store.check_index(from)?;
    store.check_index(to)?;

    if from == to {
        debug!(participant_id, group = from, "Move within same group ignored");
        return Ok(MoveOutcome::NoOp);
    }

    let present = store
        .group(from)
        .map(|g| g.contains(participant_id))
        .unwrap_or(false);
    if !present {
        return Err(EngineError::ParticipantNotInGroup {
            participant_id: participant_id.to_string(),
            group_index: from,
        });
    }

    let participant = store.remove(from, participant_id)?;
    store.add(to, participant)?;

    let moved = store
        .group(to)
        .and_then(|g| g.participants.last())
        .cloned()
        .ok_or_else(|| EngineError::UnknownParticipant(participant_id.to_string()))?;

    debug!(participant_id, from, to, count = moved.count, "Participant moved");
    Ok(MoveOutcome::Moved {
        participant: moved,
        from,
        to,
        groups: store.snapshot(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::groups::store::fixtures::{group, participant};
    use crate::models::GroupTotals;

    fn two_groups() -> GroupStore {
        let mut store = GroupStore::new();
        store.load(vec![group("g1", vec![participant("p1", 4, 1)]), group("g2", Vec::new())]);
        store
    }

    #[test]
    fn test_move_to_empty_group() {
        let mut store = two_groups();
        let outcome = move_participant(&mut store, "p1", 0, 1).unwrap();

        let MoveOutcome::Moved { participant, groups, .. } = outcome else {
            panic!("expected a move");
        };
        assert_eq!(participant.group_id.as_deref(), Some("g2"));
        assert_eq!(groups[0].cached_totals(), GroupTotals { size: 0, child_count: 0 });
        assert_eq!(groups[1].cached_totals(), GroupTotals { size: 4, child_count: 1 });
    }

    #[test]
    fn test_same_group_is_noop() {
        let mut store = two_groups();
        let before = store.snapshot();
        let outcome = move_participant(&mut store, "p1", 0, 0).unwrap();
        assert!(outcome.is_noop());
        assert_eq!(store.snapshot(), before);
    }

    #[test]
    fn test_invalid_index_rejected_without_change() {
        let mut store = two_groups();
        let before = store.snapshot();
        let err = move_participant(&mut store, "p1", 0, 5).unwrap_err();
        assert!(matches!(err, EngineError::InvalidGroupIndex { index: 5, len: 2 }));
        assert!(err.is_validation());
        assert_eq!(store.snapshot(), before);
    }

    #[test]
    fn test_participant_not_in_source() {
        let mut store = two_groups();
        let err = move_participant(&mut store, "p1", 1, 0).unwrap_err();
        assert!(matches!(err, EngineError::ParticipantNotInGroup { group_index: 1, .. }));
        assert_eq!(store.groups()[0].size, 4);
    }

    #[test]
    fn test_move_back_and_forth_conserves_totals() {
        let mut store = GroupStore::new();
        store.load(vec![
            group("g1", vec![participant("a", 2, 0), participant("b", 3, 1)]),
            group("g2", vec![participant("c", 5, 2)]),
            group("g3", Vec::new()),
        ]);
        let total = store.roster_totals();

        move_participant(&mut store, "b", 0, 2).unwrap();
        move_participant(&mut store, "c", 1, 0).unwrap();
        move_participant(&mut store, "b", 2, 1).unwrap();

        assert_eq!(store.roster_totals(), total);
        assert!(store.groups().iter().all(TourGroup::is_consistent));
        assert_eq!(store.groups()[2].size, 0);
    }
}
