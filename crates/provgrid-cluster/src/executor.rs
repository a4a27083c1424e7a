//! Running operations against nodes.
//!
//! - [`Cluster::run_on_nodes`]: fan a query out and take the first
//!   answer that is not "not found".
//! - [`Cluster::run_on_node`]: one node, with failure reporting.
//! - [`Cluster::run_on_scheduled`]: schedule, run, retry elsewhere.

use std::future::Future;
use std::sync::Arc;

use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use provgrid_scheduler::{NodeFilter, SchedulingIntent};
use provgrid_state::Node;

use crate::cluster::Cluster;
use crate::error::{ClusterError, ClusterResult, NodeError, NodeOpError};

impl Cluster {
    /// Run `op` concurrently on every candidate node.
    ///
    /// Candidates are `addresses` when non-empty (storage is not
    /// consulted), otherwise every registered node. The first outcome
    /// that is not a not-found wins and the remaining calls are
    /// cancelled. When all nodes report not-found, or the broadcast
    /// timeout elapses, the result is [`ClusterError::NotFoundAcrossNodes`].
    pub async fn run_on_nodes<T, E, F, Fut>(&self, op: F, addresses: &[String]) -> ClusterResult<T>
    where
        F: Fn(Node) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: NodeOpError,
    {
        let candidates: Vec<Node> = if addresses.is_empty() {
            self.unfiltered_nodes()?
        } else {
            addresses.iter().map(|a| Node::new(a.as_str())).collect()
        };
        if candidates.is_empty() {
            debug!("broadcast with no candidate nodes");
            return Err(ClusterError::NotFoundAcrossNodes);
        }

        let fanout = candidates.len();
        let op = Arc::new(op);
        let mut tasks = JoinSet::new();
        for node in candidates {
            let op = op.clone();
            tasks.spawn(async move {
                let address = node.address.clone();
                (address, op(node).await)
            });
        }

        let deadline = self.config().broadcast_timeout.map(|t| Instant::now() + t);
        loop {
            let joined = match deadline {
                Some(deadline) => {
                    match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                        Ok(joined) => joined,
                        Err(_) => {
                            warn!(fanout, pending = tasks.len(), "broadcast timed out");
                            return Err(ClusterError::NotFoundAcrossNodes);
                        }
                    }
                }
                None => tasks.join_next().await,
            };
            let Some(joined) = joined else { break };

            match joined {
                Ok((address, Ok(value))) => {
                    debug!(%address, fanout, "broadcast answered");
                    return Ok(value);
                }
                Ok((address, Err(e))) if e.is_not_found() => {
                    debug!(%address, "not found on node");
                }
                Ok((address, Err(e))) => {
                    warn!(%address, error = %e, "broadcast failed on node");
                    return Err(NodeError::new(address, e).into());
                }
                Err(e) => {
                    error!(error = %e, "broadcast task aborted");
                }
            }
        }

        debug!(fanout, "not found on any node");
        Err(ClusterError::NotFoundAcrossNodes)
    }

    /// Run `op` on one registered node.
    ///
    /// A failure other than not-found is returned wrapped with the
    /// address and reported to the healer in the background, counting
    /// against the node. A success clears the node's failure record
    /// when the node is not busy.
    pub async fn run_on_node<T, E, F, Fut>(&self, address: &str, op: F) -> ClusterResult<T>
    where
        F: FnOnce(Node) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: NodeOpError,
    {
        let node = self.node(address)?;
        match op(node).await {
            Ok(value) => {
                if let Err(e) = self.handle_node_success(address) {
                    debug!(%address, error = %e, "success not recorded");
                }
                Ok(value)
            }
            Err(e) => {
                let not_found = e.is_not_found();
                let err = NodeError::new(address, e);
                if !not_found {
                    warn!(%address, error = %err, "operation failed on node");
                    self.report_failure_in_background(address, err.base_error().to_string());
                }
                Err(err.into())
            }
        }
    }

    /// Schedule a node and run `op` on it, moving to a newly scheduled
    /// node when the operation fails, up to `schedule_attempts` times.
    ///
    /// Scheduling errors end the loop immediately. Returns the node the
    /// operation succeeded on, or the last error.
    pub async fn run_on_scheduled<T, E, F, Fut>(
        &self,
        intent: &SchedulingIntent,
        filter: Option<&NodeFilter>,
        op: F,
    ) -> ClusterResult<(Node, T)>
    where
        F: Fn(Node) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: NodeOpError,
    {
        let attempts = self.config().schedule_attempts.max(1);
        let mut attempt = 1;
        loop {
            let node = self.schedule(intent, filter)?;
            let err = match self.run_on_node(&node.address, &op).await {
                Ok(value) => return Ok((node, value)),
                Err(err) => err,
            };
            let retryable = matches!(
                err,
                ClusterError::NodeOperationFailed(_) | ClusterError::NoSuchNode(_)
            );
            if !retryable || attempt >= attempts {
                return Err(err);
            }
            debug!(
                address = %node.address,
                attempt,
                attempts,
                workload = %intent.workload,
                error = %err,
                "retrying on another node"
            );
            attempt += 1;
        }
    }
}
