//! Data models for guidepost entities.
//!
//! This module contains the records the engines operate on:
//!
//! - `Participant`: a booking unit that belongs to exactly one group
//! - `TourGroup`, `GroupTotals`: groups and their derived totals
//! - `Tour`, `GuideSlot`: tours and their three guide slots
//! - `Guide`, `GuideType`, `TicketClass`: guide reference data
//! - `TicketBucket`, `TourAllocation`, `BucketDraft`: entrance ticket pools

pub mod bucket;
pub mod group;
pub mod guide;
pub mod participant;
pub mod tour;

use serde::{Deserialize, Deserializer};

pub use bucket::{BucketDraft, BucketType, TicketBucket, TourAllocation};
pub use group::{GroupTotals, TourGroup};
pub use guide::{Guide, GuideType, TicketClass};
pub use participant::Participant;
pub use tour::{GuideSlot, Tour};

/// Treat an explicit `null` the same as a missing field.
/// Related collections come back as `null` when nothing is attached.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
