use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::{null_as_default, TourGroup};

/// One of the three named guide positions on a tour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum GuideSlot {
    Primary,
    Secondary,
    Tertiary,
}

impl GuideSlot {
    pub const ALL: [GuideSlot; 3] = [GuideSlot::Primary, GuideSlot::Secondary, GuideSlot::Tertiary];

    /// Parse a symbolic slot token. Accepts "primary", "primary guide",
    /// "guide1", "guide 1", "guide_1" and the same for the other slots.
    pub fn from_token(token: &str) -> Option<Self> {
        let lower = token.trim().to_lowercase();
        let compact: String = lower
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '_' && *c != '-')
            .collect();
        match compact.as_str() {
            "primary" | "primaryguide" | "guide1" | "guideone" => Some(GuideSlot::Primary),
            "secondary" | "secondaryguide" | "guide2" | "guidetwo" => Some(GuideSlot::Secondary),
            "tertiary" | "tertiaryguide" | "guide3" | "guidethree" => Some(GuideSlot::Tertiary),
            _ => None,
        }
    }

    pub fn number(&self) -> usize {
        match self {
            GuideSlot::Primary => 1,
            GuideSlot::Secondary => 2,
            GuideSlot::Tertiary => 3,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            GuideSlot::Primary => "primary guide",
            GuideSlot::Secondary => "secondary guide",
            GuideSlot::Tertiary => "tertiary guide",
        }
    }
}

impl std::fmt::Display for GuideSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Tour {
    pub id: String,
    pub date: NaiveDate,
    pub location: String,
    // Slot values are guide display names as typed on the booking.
    #[serde(default)]
    pub guide1: Option<String>,
    #[serde(default)]
    pub guide2: Option<String>,
    #[serde(default)]
    pub guide3: Option<String>,
    #[serde(default)]
    pub guide1_id: Option<String>,
    #[serde(default)]
    pub guide2_id: Option<String>,
    #[serde(default)]
    pub guide3_id: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub tour_groups: Vec<TourGroup>,
}

impl Tour {
    /// Display name held in a slot, if non-empty.
    pub fn slot_name(&self, slot: GuideSlot) -> Option<&str> {
        let value = match slot {
            GuideSlot::Primary => &self.guide1,
            GuideSlot::Secondary => &self.guide2,
            GuideSlot::Tertiary => &self.guide3,
        };
        value.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    /// Direct guide id stored alongside a slot, if non-empty.
    pub fn slot_id(&self, slot: GuideSlot) -> Option<&str> {
        let value = match slot {
            GuideSlot::Primary => &self.guide1_id,
            GuideSlot::Secondary => &self.guide2_id,
            GuideSlot::Tertiary => &self.guide3_id,
        };
        value.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    pub fn filled_slots(&self) -> Vec<GuideSlot> {
        GuideSlot::ALL
            .into_iter()
            .filter(|slot| self.slot_name(*slot).is_some() || self.slot_id(*slot).is_some())
            .collect()
    }
}
