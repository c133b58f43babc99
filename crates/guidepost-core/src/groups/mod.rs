//! Tour groups and the participants they own.
//!
//! - `GroupStore`: in-memory replica of one tour's groups
//! - `move_participant`: the transfer engine
//! - `persist`: write strategies for group and participant changes

pub mod persist;
pub mod store;
pub mod transfer;

pub use persist::{CollectionRewrite, DirectGroupWrite, GroupWrite, ParticipantWrite, VersionedGroupWrite};
pub use store::GroupStore;
pub use transfer::{move_participant, MoveOutcome};
