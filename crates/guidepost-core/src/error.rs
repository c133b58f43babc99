use thiserror::Error;

use crate::store::StoreError;

/// Failures surfaced by the engines.
///
/// Validation and capacity errors are raised before any mutation or write.
/// `PersistenceExhausted` means the local state may be ahead of storage.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid group index {index} (tour has {len} groups)")]
    InvalidGroupIndex { index: usize, len: usize },

    #[error("Participant {participant_id} is not in group {group_index}")]
    ParticipantNotInGroup {
        participant_id: String,
        group_index: usize,
    },

    #[error("Unknown participant: {0}")]
    UnknownParticipant(String),

    #[error("Invalid counts: count {count}, children {child_count}")]
    InvalidCounts { count: u32, child_count: u32 },

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Tour {tour_id} is already assigned to bucket {bucket_id}")]
    DuplicateAssignment { bucket_id: String, tour_id: String },

    #[error("Bucket {bucket_id} has {remaining} tickets left, {required} required")]
    InsufficientCapacity {
        bucket_id: String,
        remaining: u32,
        required: u32,
    },

    #[error("Tour {tour_id} is not assigned to bucket {bucket_id}")]
    NotAssigned { bucket_id: String, tour_id: String },

    #[error("Bucket {bucket_id} still supplies {tours} tour(s)")]
    BucketInUse { bucket_id: String, tours: usize },

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Could not save {label} after trying {strategies} write strategies: {source}")]
    PersistenceExhausted {
        label: String,
        strategies: usize,
        #[source]
        source: StoreError,
    },
}

impl EngineError {
    /// Malformed input, rejected before touching state.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            EngineError::InvalidGroupIndex { .. }
                | EngineError::ParticipantNotInGroup { .. }
                | EngineError::UnknownParticipant(_)
                | EngineError::InvalidCounts { .. }
                | EngineError::MissingField(_)
        )
    }

    /// Bucket could not take the request, rejected before any write.
    pub fn is_capacity(&self) -> bool {
        matches!(
            self,
            EngineError::DuplicateAssignment { .. }
                | EngineError::InsufficientCapacity { .. }
                | EngineError::NotAssigned { .. }
                | EngineError::BucketInUse { .. }
        )
    }

    pub fn is_persistence(&self) -> bool {
        matches!(self, EngineError::PersistenceExhausted { .. })
    }

    pub fn is_version_conflict(&self) -> bool {
        match self {
            EngineError::PersistenceExhausted { source, .. } => source.is_version_conflict(),
            EngineError::Store(e) => e.is_version_conflict(),
            _ => false,
        }
    }
}
