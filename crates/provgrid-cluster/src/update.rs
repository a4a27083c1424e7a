//! Partial node updates.

use provgrid_state::{CreationStatus, Metadata, Node};

use crate::error::{ClusterError, ClusterResult};

/// Changes applied to one node by [`Cluster::update_node`](crate::Cluster::update_node).
///
/// Metadata is merged key by key; an empty value deletes the key. The
/// status is only touched when set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeUpdate {
    pub address: String,
    pub metadata: Metadata,
    pub creation_status: Option<CreationStatus>,
}

impl NodeUpdate {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }

    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Delete `key` on merge.
    pub fn remove(mut self, key: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), String::new());
        self
    }

    pub fn status(mut self, status: CreationStatus) -> Self {
        self.creation_status = Some(status);
        self
    }

    /// Apply to `node`. `Error` is terminal for regular updates; a
    /// rejected update leaves `node` untouched.
    pub(crate) fn apply(&self, node: &mut Node) -> ClusterResult<()> {
        if let Some(status) = self.creation_status {
            if node.creation_status == CreationStatus::Error && status != CreationStatus::Error {
                return Err(ClusterError::InvalidStatusTransition {
                    address: node.address.clone(),
                    current: node.creation_status,
                });
            }
            node.creation_status = status;
        }
        node.merge_metadata(&self.metadata);
        Ok(())
    }
}
