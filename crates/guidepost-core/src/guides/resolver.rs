//! Guide identity resolution.
//!
//! Maps a [`GuideRef`] to a canonical guide id against one tour's slots and
//! the guide directory. A reference that cannot be mapped is never an error:
//! the caller treats it as "no guide".

use std::collections::HashMap;

use tracing::{debug, warn};

use super::reference::{is_canonical_id, GuideRef};
use crate::models::{Guide, Tour};

/// Guides indexed by id, looked up by exact display name.
#[derive(Debug, Clone, Default)]
pub struct GuideDirectory {
    guides: Vec<Guide>,
    by_id: HashMap<String, usize>,
}

impl GuideDirectory {
    pub fn new(guides: Vec<Guide>) -> Self {
        let by_id = guides
            .iter()
            .enumerate()
            .map(|(i, g)| (g.id.clone(), i))
            .collect();
        Self { guides, by_id }
    }

    pub fn get(&self, id: &str) -> Option<&Guide> {
        self.by_id.get(id).map(|&i| &self.guides[i])
    }

    /// First guide whose display name equals `name` exactly.
    pub fn by_name(&self, name: &str) -> Option<&Guide> {
        let name = name.trim();
        self.guides.iter().find(|g| g.name.trim() == name)
    }

    pub fn guides(&self) -> &[Guide] {
        &self.guides
    }

    pub fn len(&self) -> usize {
        self.guides.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guides.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Resolved(String),
    /// The reference explicitly asked for no guide.
    Cleared,
    /// Nothing matched; treated as no guide. Holds the reference as given.
    Unresolved(String),
}

impl Resolution {
    pub fn guide_id(&self) -> Option<&str> {
        match self {
            Resolution::Resolved(id) => Some(id),
            Resolution::Cleared | Resolution::Unresolved(_) => None,
        }
    }

    pub fn is_unresolved(&self) -> bool {
        matches!(self, Resolution::Unresolved(_))
    }
}

/// Resolve a guide reference. First match wins:
/// a canonical id as given; a slot's display name found in the directory;
/// the slot's stored id; a directory entry with the same display name.
pub fn resolve(reference: &GuideRef, tour: &Tour, directory: &GuideDirectory) -> Resolution {
    let resolved = match reference {
        GuideRef::None => return Resolution::Cleared,
        GuideRef::CanonicalId(id) => Some(id.clone()),
        GuideRef::Slot(slot) => {
            let by_name = tour
                .slot_name(*slot)
                .and_then(|name| directory.by_name(name))
                .map(|g| g.id.clone());
            by_name.or_else(|| {
                tour.slot_id(*slot)
                    .filter(|id| is_canonical_id(id))
                    .map(str::to_string)
            })
        }
        GuideRef::DisplayName(name) => directory.by_name(name).map(|g| g.id.clone()),
    };

    match resolved {
        Some(id) => {
            debug!(tour_id = %tour.id, reference = %reference, guide_id = %id, "Guide resolved");
            Resolution::Resolved(id)
        }
        None => {
            warn!(tour_id = %tour.id, reference = %reference, "Could not map guide reference");
            Resolution::Unresolved(reference.to_string())
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::NaiveDate;

    use crate::models::{Guide, GuideType, Tour};

    pub const ANNA: &str = "7c9e6679-7425-40de-944b-e07fc1f90ae7";
    pub const BRUNO: &str = "16fd2706-8baf-433b-82eb-8c7fada847da";
    pub const CLARA: &str = "9a1f44d2-0b1e-4c52-8a53-3c6f3e2d8b10";

    pub fn directory() -> super::GuideDirectory {
        super::GuideDirectory::new(vec![
            Guide { id: ANNA.into(), name: "Anna Weber".into(), guide_type: GuideType::AdultTicket },
            Guide { id: BRUNO.into(), name: "Bruno Marchal".into(), guide_type: GuideType::GuidesInside },
            Guide { id: CLARA.into(), name: "Clara Lindqvist".into(), guide_type: GuideType::ChildTicket },
        ])
    }

    pub fn tour(location: &str) -> Tour {
        Tour {
            id: "t1".into(),
            date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
            location: location.into(),
            guide1: Some("Anna Weber".into()),
            guide2: None,
            guide3: Some("Somebody New".into()),
            guide1_id: None,
            guide2_id: None,
            guide3_id: Some(CLARA.into()),
            tour_groups: Vec::new(),
        }
    }
}
