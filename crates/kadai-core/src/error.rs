//! Typed failures for user-initiated store mutations.

use crate::task::{GroupId, TaskId};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("task {0} not found")]
    TaskNotFound(TaskId),

    #[error("group {0} not found")]
    GroupNotFound(GroupId),

    /// Text is blank and no image is attached.
    #[error("a task needs text or at least one image")]
    EmptyTask,

    #[error("priority {0} is outside 0..=5")]
    PriorityOutOfRange(u8),

    #[error("group name cannot be empty")]
    EmptyGroupName,

    #[error("invalid group color {0:?}; expected #rrggbb")]
    InvalidColor(String),

    /// The backing key-value store failed.
    #[error("storage error: {0:#}")]
    Storage(#[from] anyhow::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
