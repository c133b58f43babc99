use tracing::info;

use super::reference::GuideRef;
use super::resolver::{resolve, GuideDirectory, Resolution};
use crate::error::EngineError;
use crate::groups::GroupStore;
use crate::models::{Guide, Tour, TourGroup};

/// Result of assigning a guide to a group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuideAssignment {
    pub resolution: Resolution,
    pub group: TourGroup,
}

impl GuideAssignment {
    pub fn guide_id(&self) -> Option<&str> {
        self.group.guide_id.as_deref()
    }
}

/// "Group 2" or "Group 2 - Anna Weber". `index` is zero-based.
pub fn group_display_name(index: usize, guide: Option<&Guide>) -> String {
    match guide {
        Some(g) => format!("Group {} - {}", index + 1, g.name.trim()),
        None => format!("Group {}", index + 1),
    }
}

/// Resolve `reference` and set it as the guide of group `index`, renaming
/// the group after its guide. An unresolved reference leaves the group
/// without a guide.
pub fn assign_guide(
    store: &mut GroupStore,
    index: usize,
    reference: &GuideRef,
    tour: &Tour,
    directory: &GuideDirectory,
) -> Result<GuideAssignment, EngineError> {
    store.check_index(index)?;

    let resolution = resolve(reference, tour, directory);
    let guide_id = resolution.guide_id().map(str::to_string);
    let guide = guide_id.as_deref().and_then(|id| directory.get(id));
    let name = group_display_name(index, guide);

    store.set_guide(index, guide_id, name)?;
    let group = store
        .group(index)
        .cloned()
        .ok_or(EngineError::InvalidGroupIndex { index, len: store.len() })?;

    info!(
        tour_id = %tour.id,
        group_id = %group.id,
        guide_id = group.guide_id.as_deref().unwrap_or("none"),
        "Guide assigned"
    );
    Ok(GuideAssignment { resolution, group })
}
