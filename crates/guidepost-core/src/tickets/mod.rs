//! Entrance tickets: what a tour needs and which bucket supplies it.

pub mod allocator;
pub mod requirement;

pub use allocator::{
    apply_assign, apply_release, candidate_buckets, check_assign, BucketAllocator, MAX_CONFLICT_REFETCHES,
};
pub use requirement::{requirement, tour_ticket_need, TicketNeed, TicketRequirement, VenuePolicy};
