//! Entrance ticket requirements for a tour.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::guides::GuideDirectory;
use crate::models::{GroupTotals, GuideType, TicketClass, TourGroup};
use crate::utils::contains_ignore_case;

/// Venues whose entrance requires tickets for guides too.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VenuePolicy {
    venues: Vec<String>,
}

impl Default for VenuePolicy {
    fn default() -> Self {
        Self::new(["versailles", "louvre"])
    }
}

impl VenuePolicy {
    pub fn new<I, S>(venues: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            venues: venues
                .into_iter()
                .map(|v| v.as_ref().trim().to_lowercase())
                .filter(|v| !v.is_empty())
                .collect(),
        }
    }

    /// Case-insensitive substring match against the allow-list.
    pub fn requires_guide_tickets(&self, venue: &str) -> bool {
        self.venues.iter().any(|v| contains_ignore_case(venue, v))
    }

    pub fn venues(&self) -> &[String] {
        &self.venues
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct TicketRequirement {
    pub needs_ticket: bool,
    pub ticket_class: TicketClass,
}

impl TicketRequirement {
    const NONE: Self = Self {
        needs_ticket: false,
        ticket_class: TicketClass::None,
    };
}

/// Ticket a guide of `guide_type` needs at `venue`.
pub fn requirement(guide_type: GuideType, venue: &str, policy: &VenuePolicy) -> TicketRequirement {
    if !policy.requires_guide_tickets(venue) {
        return TicketRequirement::NONE;
    }
    match guide_type.ticket_class() {
        TicketClass::None => TicketRequirement::NONE,
        class => TicketRequirement {
            needs_ticket: true,
            ticket_class: class,
        },
    }
}

/// Adult and child tickets needed by a tour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct TicketNeed {
    pub adult: u32,
    pub child: u32,
}

impl TicketNeed {
    pub fn total(&self) -> u32 {
        self.adult + self.child
    }

    fn add(&mut self, class: TicketClass) {
        match class {
            TicketClass::Adult => self.adult += 1,
            TicketClass::Child => self.child += 1,
            TicketClass::None => {}
        }
    }
}

/// Participants' adult and child counts plus one ticket per assigned guide
/// that needs one. A guide assigned to several groups is counted once;
/// a guide missing from the directory is taken as an adult-ticket guide.
pub fn tour_ticket_need(
    groups: &[TourGroup],
    venue: &str,
    directory: &GuideDirectory,
    policy: &VenuePolicy,
) -> TicketNeed {
    let totals: GroupTotals = groups.iter().map(TourGroup::totals).sum();
    let mut need = TicketNeed {
        adult: totals.adult_count(),
        child: totals.child_count,
    };

    let guide_ids: BTreeSet<&str> = groups.iter().filter_map(|g| g.guide_id.as_deref()).collect();
    for id in guide_ids {
        let guide_type = directory.get(id).map(|g| g.guide_type).unwrap_or_default();
        let req = requirement(guide_type, venue, policy);
        if req.needs_ticket {
            need.add(req.ticket_class);
        }
    }

    debug!(venue, adult = need.adult, child = need.child, "Ticket need computed");
    need
}
