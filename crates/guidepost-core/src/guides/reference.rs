use serde::{Deserialize, Serialize};

use crate::models::GuideSlot;

/// A raw guide reference as supplied by a caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum GuideRef {
    /// Explicitly no guide. The only way to clear a group's guide.
    None,
    Slot(GuideSlot),
    CanonicalId(String),
    DisplayName(String),
}

const NONE_TOKENS: [&str; 5] = ["", "none", "unassigned", "no guide", "-"];

impl GuideRef {
    /// Classify a free-form reference.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if NONE_TOKENS.contains(&trimmed.to_lowercase().as_str()) {
            GuideRef::None
        } else if is_canonical_id(trimmed) {
            GuideRef::CanonicalId(trimmed.to_string())
        } else if let Some(slot) = GuideSlot::from_token(trimmed) {
            GuideRef::Slot(slot)
        } else {
            GuideRef::DisplayName(trimmed.to_string())
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, GuideRef::None)
    }
}

impl From<&str> for GuideRef {
    fn from(raw: &str) -> Self {
        GuideRef::parse(raw)
    }
}

impl std::fmt::Display for GuideRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GuideRef::None => write!(f, "none"),
            GuideRef::Slot(slot) => write!(f, "{}", slot),
            GuideRef::CanonicalId(id) => write!(f, "{}", id),
            GuideRef::DisplayName(name) => write!(f, "{}", name),
        }
    }
}

/// Whether `s` has the 8-4-4-4-12 hex shape of a stored guide id.
pub fn is_canonical_id(s: &str) -> bool {
    if s.len() != 36 {
        return false;
    }
    s.chars().enumerate().all(|(i, c)| match i {
        8 | 13 | 18 | 23 => c == '-',
        _ => c.is_ascii_hexdigit(),
    })
}
