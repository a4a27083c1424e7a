//! Cluster error types.

use std::error::Error as StdError;

use thiserror::Error;

use provgrid_scheduler::SchedulerError;
use provgrid_state::{CreationStatus, StorageError};

type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Errors surfaced by [`Cluster`](crate::Cluster) operations.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("invalid node: {0}")]
    InvalidNode(String),

    #[error("duplicate node address: {0}")]
    DuplicateAddress(String),

    #[error("no such node: {0}")]
    NoSuchNode(String),

    #[error("No nodes available")]
    NoNodesAvailable,

    #[error("node {0} is locked by another update or a healing episode")]
    LockContention(String),

    #[error("cannot update node status when current status is \"{current}\"")]
    InvalidStatusTransition {
        address: String,
        current: CreationStatus,
    },

    #[error(transparent)]
    NodeOperationFailed(#[from] NodeError),

    #[error("not found on any node")]
    NotFoundAcrossNodes,

    #[error("no scheduler configured")]
    SchedulerUnavailable,

    #[error("storage error: {0}")]
    Storage(StorageError),
}

pub type ClusterResult<T> = Result<T, ClusterError>;

impl From<StorageError> for ClusterError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::DuplicateAddress(address) => Self::DuplicateAddress(address),
            StorageError::NoSuchNode(address) => Self::NoSuchNode(address),
            other => Self::Storage(other),
        }
    }
}

impl From<SchedulerError> for ClusterError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::NoNodesAvailable => Self::NoNodesAvailable,
            SchedulerError::Storage(e) => e.into(),
        }
    }
}

/// Failure of an operation against one node, tagged with its address.
#[derive(Debug, Error)]
#[error("error in node {address:?}: {source}")]
pub struct NodeError {
    address: String,
    source: BoxError,
}

impl NodeError {
    pub fn new(address: impl Into<String>, err: impl Into<BoxError>) -> Self {
        Self {
            address: address.into(),
            source: err.into(),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// The original error, for downcasting.
    pub fn base_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
        self.source.as_ref()
    }
}

/// Error type of per-node operations.
///
/// `is_not_found` tells the broadcast executor that the node answered
/// but does not have what was asked for, so the next node should be
/// tried. Anything else is a real failure.
pub trait NodeOpError: StdError + Send + Sync + 'static {
    fn is_not_found(&self) -> bool {
        false
    }
}

impl NodeOpError for std::io::Error {
    fn is_not_found(&self) -> bool {
        self.kind() == std::io::ErrorKind::NotFound
    }
}
