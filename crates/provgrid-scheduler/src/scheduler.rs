//! Scheduling contract.

use serde::{Deserialize, Serialize};

use provgrid_state::{Metadata, Node, StorageResult};

use crate::error::SchedulerResult;

/// The view of the node set a scheduler chooses from.
pub trait NodeSource: Send + Sync {
    /// Nodes that are neither healing nor disabled, in registration order.
    fn available_nodes(&self) -> StorageResult<Vec<Node>>;

    /// Available nodes whose metadata contains every `criteria` pair.
    fn available_nodes_for_metadata(&self, criteria: &Metadata) -> StorageResult<Vec<Node>> {
        Ok(self
            .available_nodes()?
            .into_iter()
            .filter(|node| node.matches_metadata(criteria))
            .collect())
    }
}

/// What the caller wants to run. Opaque to the round-robin strategy;
/// smarter strategies can inspect `options`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulingIntent {
    /// Name of the workload (box, container, machine).
    pub workload: String,
    /// Provider-specific creation options.
    #[serde(default)]
    pub options: serde_json::Value,
}

impl SchedulingIntent {
    pub fn new(workload: impl Into<String>) -> Self {
        Self {
            workload: workload.into(),
            options: serde_json::Value::Null,
        }
    }

    pub fn with_options(mut self, options: serde_json::Value) -> Self {
        self.options = options;
        self
    }
}

/// Restricts scheduling to nodes carrying the given metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeFilter {
    pub metadata: Metadata,
}

impl NodeFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Selects one eligible node per request.
pub trait Scheduler: Send + Sync {
    fn schedule(
        &self,
        source: &dyn NodeSource,
        intent: &SchedulingIntent,
        filter: Option<&NodeFilter>,
    ) -> SchedulerResult<Node>;
}
