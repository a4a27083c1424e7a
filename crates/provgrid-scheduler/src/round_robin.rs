//! Round-robin scheduling.
//!
//! The cursor walks list positions, not node identities: each call takes
//! whatever the eligible list is right now and returns the entry at
//! `cursor % len`. Nodes joining, leaving or healing between calls may
//! cause one node to be skipped or repeated; for a fixed node set the
//! rotation is exact.

use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::debug;

use provgrid_state::Node;

use crate::error::{SchedulerError, SchedulerResult};
use crate::scheduler::{NodeFilter, NodeSource, Scheduler, SchedulingIntent};

/// Lock-free round-robin scheduler.
#[derive(Debug, Default)]
pub struct RoundRobinScheduler {
    cursor: AtomicUsize,
}

impl RoundRobinScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the cursor and pick from `nodes`.
    fn pick(&self, mut nodes: Vec<Node>) -> Option<Node> {
        if nodes.is_empty() {
            return None;
        }
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % nodes.len();
        Some(nodes.swap_remove(idx))
    }

    /// Current cursor value (for diagnostics).
    pub fn position(&self) -> usize {
        self.cursor.load(Ordering::Relaxed)
    }
}

impl Scheduler for RoundRobinScheduler {
    fn schedule(
        &self,
        source: &dyn NodeSource,
        intent: &SchedulingIntent,
        filter: Option<&NodeFilter>,
    ) -> SchedulerResult<Node> {
        let nodes = match filter {
            Some(f) if !f.metadata.is_empty() => source.available_nodes_for_metadata(&f.metadata)?,
            _ => source.available_nodes()?,
        };
        let eligible = nodes.len();
        let node = self.pick(nodes).ok_or(SchedulerError::NoNodesAvailable)?;
        debug!(
            workload = %intent.workload,
            address = %node.address,
            eligible,
            "node scheduled"
        );
        Ok(node)
    }
}
