//! In-memory replica of one tour's groups.
//!
//! Every roster change goes through `add`/`remove` here, and both refresh the
//! touched group's totals from its participants on the spot. Cached totals are
//! never adjusted on their own.

use tracing::debug;

use crate::error::EngineError;
use crate::models::{GroupTotals, Participant, TourGroup};

#[derive(Debug, Clone, Default)]
pub struct GroupStore {
    groups: Vec<TourGroup>,
}

impl GroupStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole state. Cached totals from storage are recomputed;
    /// any drift is logged and discarded.
    pub fn load(&mut self, groups: Vec<TourGroup>) {
        self.groups = groups;
        for group in &mut self.groups {
            let stored = group.cached_totals();
            if group.refresh_totals() {
                debug!(
                    group_id = %group.id,
                    stored_size = stored.size,
                    size = group.size,
                    "Discarding drifted group totals"
                );
            }
        }
    }

    /// Pure fold over a group's participants.
    pub fn recompute(group: &TourGroup) -> GroupTotals {
        group.totals()
    }

    pub fn replace_groups(&mut self, groups: Vec<TourGroup>) {
        self.load(groups);
    }

    pub fn groups(&self) -> &[TourGroup] {
        &self.groups
    }

    pub fn group(&self, index: usize) -> Option<&TourGroup> {
        self.groups.get(index)
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn index_of(&self, group_id: &str) -> Option<usize> {
        self.groups.iter().position(|g| g.id == group_id)
    }

    /// Totals across every group of the tour.
    pub fn roster_totals(&self) -> GroupTotals {
        self.groups.iter().map(TourGroup::totals).sum()
    }

    pub fn find_participant(&self, participant_id: &str) -> Option<(usize, &Participant)> {
        self.groups.iter().enumerate().find_map(|(index, group)| {
            group
                .participants
                .iter()
                .find(|p| p.id == participant_id)
                .map(|p| (index, p))
        })
    }

    pub fn check_index(&self, index: usize) -> Result<(), EngineError> {
        if index < self.groups.len() {
            Ok(())
        } else {
            Err(EngineError::InvalidGroupIndex {
                index,
                len: self.groups.len(),
            })
        }
    }

    /// Remove a participant from a group and refresh that group's totals.
    pub(crate) fn remove(&mut self, index: usize, participant_id: &str) -> Result<Participant, EngineError> {
        self.check_index(index)?;
        let group = &mut self.groups[index];
        let position = group
            .position_of(participant_id)
            .ok_or_else(|| EngineError::ParticipantNotInGroup {
                participant_id: participant_id.to_string(),
                group_index: index,
            })?;
        let participant = group.participants.remove(position);
        group.refresh_totals();
        Ok(participant)
    }

    /// Append a participant to a group, pointing it at the group, and refresh totals.
    pub(crate) fn add(&mut self, index: usize, mut participant: Participant) -> Result<(), EngineError> {
        self.check_index(index)?;
        let group = &mut self.groups[index];
        participant.group_id = Some(group.id.clone());
        group.participants.push(participant);
        group.refresh_totals();
        Ok(())
    }

    pub(crate) fn set_guide(&mut self, index: usize, guide_id: Option<String>, name: String) -> Result<(), EngineError> {
        self.check_index(index)?;
        let group = &mut self.groups[index];
        group.guide_id = guide_id;
        group.name = name;
        Ok(())
    }

    /// Admin correction of a participant's counts. Returns the owning group index.
    pub fn correct_counts(
        &mut self,
        participant_id: &str,
        count: u32,
        child_count: u32,
    ) -> Result<usize, EngineError> {
        if !Participant::counts_valid(count, child_count) {
            return Err(EngineError::InvalidCounts { count, child_count });
        }
        let (index, _) = self
            .find_participant(participant_id)
            .ok_or_else(|| EngineError::UnknownParticipant(participant_id.to_string()))?;
        let group = &mut self.groups[index];
        if let Some(p) = group.participants.iter_mut().find(|p| p.id == participant_id) {
            p.count = count;
            p.child_count = child_count;
        }
        group.refresh_totals();
        Ok(index)
    }

    /// Put back a pre-mutation copy of a group, matched by id.
    pub(crate) fn restore(&mut self, snapshot: TourGroup) {
        match self.groups.iter_mut().find(|g| g.id == snapshot.id) {
            Some(group) => *group = snapshot,
            None => debug!(group_id = %snapshot.id, "Snapshot for unknown group dropped"),
        }
    }

    /// Adopt the version a successful write stored.
    pub(crate) fn set_version(&mut self, group_id: &str, version: u64) {
        if let Some(group) = self.groups.iter_mut().find(|g| g.id == group_id) {
            group.version = version;
        }
    }

    pub fn snapshot(&self) -> Vec<TourGroup> {
        self.groups.clone()
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn participant(id: &str, count: u32, child_count: u32) -> Participant {
        Participant {
            id: id.to_string(),
            name: format!("Party {}", id),
            booking_ref: Some(format!("BK-{}", id)),
            count,
            child_count,
            group_id: None,
        }
    }

    pub fn group(id: &str, participants: Vec<Participant>) -> TourGroup {
        let participants = participants
            .into_iter()
            .map(|mut p| {
                p.group_id = Some(id.to_string());
                p
            })
            .collect();
        TourGroup {
            id: id.to_string(),
            tour_id: "t1".to_string(),
            name: "Group".to_string(),
            entry_time: None,
            guide_id: None,
            size: 0,
            child_count: 0,
            version: 0,
            participants,
        }
    }
}
