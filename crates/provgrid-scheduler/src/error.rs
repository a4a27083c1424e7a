//! Scheduler error types.

use thiserror::Error;

/// Errors that can occur while selecting a node.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("No nodes available")]
    NoNodesAvailable,

    #[error("storage error: {0}")]
    Storage(#[from] provgrid_state::StorageError),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
