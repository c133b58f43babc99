use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use super::{null_as_default, Participant};

/// Totals derived from a group's participants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct GroupTotals {
    pub size: u32,
    pub child_count: u32,
}

impl GroupTotals {
    /// Fold over a participant list. This is the only source of truth for totals.
    pub fn of(participants: &[Participant]) -> Self {
        participants.iter().fold(Self::default(), |acc, p| Self {
            size: acc.size + p.count,
            child_count: acc.child_count + p.child_count,
        })
    }

    pub fn adult_count(&self) -> u32 {
        self.size.saturating_sub(self.child_count)
    }
}

impl std::ops::Add for GroupTotals {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            size: self.size + rhs.size,
            child_count: self.child_count + rhs.child_count,
        }
    }
}

impl std::iter::Sum for GroupTotals {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), |acc, t| acc + t)
    }
}

/// A sub-division of a tour with its own entry time and guide.
///
/// `size` and `child_count` are a display cache of [`GroupTotals::of`] over
/// `participants`. They are refreshed after every roster change and are never
/// adjusted on their own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct TourGroup {
    pub id: String,
    pub tour_id: String,
    pub name: String,
    #[serde(default)]
    pub entry_time: Option<NaiveTime>,
    #[serde(default)]
    pub guide_id: Option<String>,
    #[serde(default)]
    pub size: u32,
    #[serde(default)]
    pub child_count: u32,
    #[serde(default)]
    pub version: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub participants: Vec<Participant>,
}

impl TourGroup {
    pub fn totals(&self) -> GroupTotals {
        GroupTotals::of(&self.participants)
    }

    pub fn cached_totals(&self) -> GroupTotals {
        GroupTotals {
            size: self.size,
            child_count: self.child_count,
        }
    }

    /// Overwrite the cached totals with the folded ones. Returns true if they drifted.
    pub fn refresh_totals(&mut self) -> bool {
        let totals = self.totals();
        let drifted = totals != self.cached_totals();
        self.size = totals.size;
        self.child_count = totals.child_count;
        drifted
    }

    pub fn is_consistent(&self) -> bool {
        self.totals() == self.cached_totals()
    }

    pub fn position_of(&self, participant_id: &str) -> Option<usize> {
        self.participants.iter().position(|p| p.id == participant_id)
    }

    pub fn contains(&self, participant_id: &str) -> bool {
        self.position_of(participant_id).is_some()
    }

    /// Storage row for this group. Participants live in their own collection.
    pub fn row(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "tour_id": self.tour_id,
            "name": self.name,
            "entry_time": self.entry_time,
            "guide_id": self.guide_id,
            "size": self.size,
            "child_count": self.child_count,
            "version": self.version,
        })
    }
}
