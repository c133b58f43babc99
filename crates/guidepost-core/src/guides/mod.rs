//! Guide references, identity resolution and group guide assignment.

pub mod assignment;
pub mod reference;
pub mod resolver;

pub use assignment::{assign_guide, group_display_name, GuideAssignment};
pub use reference::{is_canonical_id, GuideRef};
pub use resolver::{resolve, GuideDirectory, Resolution};
