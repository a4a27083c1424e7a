//! The cluster facade: registry, per-node locking and failure handling.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, error, info, warn};

use provgrid_core::{ClusterSettings, ProvConfig};
use provgrid_health::{Healer, NoopHealer, healer_from_settings};
use provgrid_scheduler::{
    NodeFilter, NodeSource, RoundRobinScheduler, Scheduler, SchedulingIntent,
};
use provgrid_state::{CreationStatus, Metadata, Node, Storage, StorageResult};

use crate::error::{ClusterError, ClusterResult};
use crate::locks::NodeLocks;
use crate::update::NodeUpdate;

/// Registry of worker nodes.
///
/// Cheap to clone; clones share storage, locks, healer and scheduler.
#[derive(Clone)]
pub struct Cluster {
    storage: Arc<dyn Storage>,
    scheduler: Option<Arc<dyn Scheduler>>,
    healer: Arc<dyn Healer>,
    locks: Arc<NodeLocks>,
    config: ClusterSettings,
}

impl fmt::Debug for Cluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cluster")
            .field("has_scheduler", &self.scheduler.is_some())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Cluster {
    /// Cluster over `storage` with the no-op healer and no scheduler.
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            scheduler: None,
            healer: Arc::new(NoopHealer),
            locks: Arc::new(NodeLocks::default()),
            config: ClusterSettings::default(),
        }
    }

    pub fn with_scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn with_healer(mut self, healer: Arc<dyn Healer>) -> Self {
        self.healer = healer;
        self
    }

    pub fn with_config(mut self, config: ClusterSettings) -> Self {
        self.config = config;
        self
    }

    /// Build a round-robin cluster from a config file and register its
    /// seed nodes. Seeds already present in `storage` are kept as stored.
    pub fn from_config(config: &ProvConfig, storage: Arc<dyn Storage>) -> ClusterResult<Self> {
        let cluster = Self::new(storage)
            .with_scheduler(Arc::new(RoundRobinScheduler::new()))
            .with_healer(healer_from_settings(&config.healer))
            .with_config(config.cluster.clone());

        for seed in &config.nodes {
            let mut node = Node::new(seed.address.clone());
            node.metadata = seed.metadata.clone();
            match cluster.register(node) {
                Ok(()) | Err(ClusterError::DuplicateAddress(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(cluster)
    }

    pub fn config(&self) -> &ClusterSettings {
        &self.config
    }

    // ── Registry ──────────────────────────────────────────────────

    /// Register the initial node set, stopping at the first failure.
    pub fn register_all(&self, nodes: impl IntoIterator<Item = Node>) -> ClusterResult<()> {
        for node in nodes {
            self.register(node)?;
        }
        Ok(())
    }

    pub fn register(&self, node: Node) -> ClusterResult<()> {
        if node.address.trim().is_empty() {
            return Err(ClusterError::InvalidNode(
                "node address must not be empty".to_string(),
            ));
        }
        self.storage.store_node(&node)?;
        info!(
            address = %node.address,
            status = %node.creation_status,
            "node registered"
        );
        Ok(())
    }

    pub fn unregister(&self, address: &str) -> ClusterResult<()> {
        self.storage.remove_node(address)?;
        self.locks.forget(address);
        info!(%address, "node unregistered");
        Ok(())
    }

    pub fn node(&self, address: &str) -> ClusterResult<Node> {
        Ok(self.storage.retrieve_node(address)?)
    }

    /// Nodes that are neither healing nor disabled, in registration order.
    pub fn nodes(&self) -> ClusterResult<Vec<Node>> {
        Ok(self.available_nodes()?)
    }

    /// Every registered node, healing and disabled ones included.
    pub fn unfiltered_nodes(&self) -> ClusterResult<Vec<Node>> {
        Ok(self.storage.retrieve_nodes()?)
    }

    /// Available nodes whose metadata contains every `criteria` pair.
    pub fn nodes_for_metadata(&self, criteria: &Metadata) -> ClusterResult<Vec<Node>> {
        Ok(self.available_nodes_for_metadata(criteria)?)
    }

    // ── Updates ───────────────────────────────────────────────────

    /// Merge `update` into the stored node and return the result.
    ///
    /// Fails fast with [`ClusterError::LockContention`] while another
    /// update or a healing episode holds the node.
    pub fn update_node(&self, update: NodeUpdate) -> ClusterResult<Node> {
        let address = update.address.clone();
        self.with_node_lock(&address, move || {
            let mut node = self.storage.retrieve_node(&update.address)?;
            update.apply(&mut node)?;
            self.storage.update_node(&node)?;
            debug!(address = %node.address, status = %node.creation_status, "node updated");
            Ok(node)
        })
    }

    /// Set the creation status unconditionally. Administrative: leaves
    /// the `Error` state and waits for the node lock instead of failing.
    pub async fn override_creation_status(
        &self,
        address: &str,
        status: CreationStatus,
    ) -> ClusterResult<Node> {
        let guard = self.locks.acquire(address).await;
        let result = self.set_status_locked(address, status);
        drop(guard);
        self.forget_if_missing(address, &result);
        result
    }

    fn set_status_locked(&self, address: &str, status: CreationStatus) -> ClusterResult<Node> {
        let mut node = self.storage.retrieve_node(address)?;
        let previous = node.creation_status;
        node.creation_status = status;
        self.storage.update_node(&node)?;
        info!(%address, %previous, %status, "creation status overridden");
        Ok(node)
    }

    // ── Health ────────────────────────────────────────────────────

    /// Run one healing episode for a failed node.
    ///
    /// Waits for the node lock, so reports for the same node run one at
    /// a time and each consults the healer once. While the healer runs
    /// the node is marked healing and left out of `nodes()`.
    pub async fn handle_node_error(
        &self,
        address: &str,
        cause: impl fmt::Display,
        count_failure: bool,
    ) -> ClusterResult<()> {
        let cause = cause.to_string();
        let guard = self.locks.acquire(address).await;
        let result = self.heal_locked(guard, address, &cause, count_failure).await;
        self.forget_if_missing(address, &result);
        result
    }

    /// The healing episode proper, run under `lock`.
    async fn heal_locked(
        &self,
        lock: OwnedMutexGuard<()>,
        address: &str,
        cause: &str,
        count_failure: bool,
    ) -> ClusterResult<()> {
        let mut node = self.storage.retrieve_node(address)?;
        node.record_failure(cause, count_failure);
        node.start_healing(cause, after(Utc::now(), self.config.healing_lock_ttl));
        self.storage.update_node(&node)?;
        warn!(
            %address,
            failures = node.failure_count,
            reason = %cause,
            "node failure reported, healing"
        );

        // Clears the healing mark if this future is dropped or the
        // healer panics before the episode completes.
        let mut reset = HealingReset::new(self.storage.as_ref(), address, lock);
        let disable_for = self.healer.handle_error(&node).await;

        // Re-read: an unregister/register may have replaced the record.
        let mut node = self.storage.retrieve_node(address)?;
        if disable_for.is_zero() {
            node.clear_disabled_until();
        } else {
            node.set_disabled_until(after(Utc::now(), disable_for));
        }
        node.finish_healing();
        self.storage.update_node(&node)?;
        reset.disarm();

        if disable_for.is_zero() {
            info!(%address, failures = node.failure_count, "healing finished, node enabled");
        } else {
            info!(
                %address,
                failures = node.failure_count,
                disabled_for = ?disable_for,
                "healing finished, node disabled"
            );
        }
        Ok(())
    }

    /// Clear failure bookkeeping after a successful operation.
    ///
    /// Returns whether anything changed. Fails with
    /// [`ClusterError::LockContention`] if the node is busy.
    pub fn handle_node_success(&self, address: &str) -> ClusterResult<bool> {
        self.with_node_lock(address, || {
            let mut node = self.storage.retrieve_node(address)?;
            if !node.record_success(Utc::now()) {
                return Ok(false);
            }
            self.storage.update_node(&node)?;
            info!(%address, "node recovered");
            Ok(true)
        })
    }

    /// Clear healing marks left behind by a process that died mid-episode.
    ///
    /// Only nodes whose `locked_until` has passed and whose lock is free
    /// in this process are touched. Returns the recovered addresses.
    pub fn recover_stale_healing(&self) -> ClusterResult<Vec<String>> {
        let now = Utc::now();
        let mut recovered = Vec::new();

        for node in self.storage.retrieve_nodes()? {
            if !node.is_healing() || node.healing.locked_until.is_some_and(|t| t > now) {
                continue;
            }
            let Some(_guard) = self.locks.try_acquire(&node.address) else {
                debug!(address = %node.address, "healing in progress, not stale");
                continue;
            };
            let mut current = self.storage.retrieve_node(&node.address)?;
            if !current.is_healing() {
                continue;
            }
            current.finish_healing();
            self.storage.update_node(&current)?;
            warn!(
                address = %current.address,
                reason = %node.healing.reason,
                "stale healing lock cleared"
            );
            recovered.push(current.address);
        }
        Ok(recovered)
    }

    // ── Scheduling ────────────────────────────────────────────────

    /// Pick an available node with the configured scheduler.
    pub fn schedule(
        &self,
        intent: &SchedulingIntent,
        filter: Option<&NodeFilter>,
    ) -> ClusterResult<Node> {
        let scheduler = self
            .scheduler
            .as_ref()
            .ok_or(ClusterError::SchedulerUnavailable)?;
        Ok(scheduler.schedule(self, intent, filter)?)
    }

    // ── Internals ─────────────────────────────────────────────────

    /// Run `f` under the node's lock without waiting for it.
    fn with_node_lock<T>(
        &self,
        address: &str,
        f: impl FnOnce() -> ClusterResult<T>,
    ) -> ClusterResult<T> {
        let Some(guard) = self.locks.try_acquire(address) else {
            warn!(%address, "node is busy");
            return Err(ClusterError::LockContention(address.to_string()));
        };
        let result = f();
        drop(guard);
        self.forget_if_missing(address, &result);
        result
    }

    /// Drop the lock entry of an address that turned out not to exist.
    fn forget_if_missing<T>(&self, address: &str, result: &ClusterResult<T>) {
        if matches!(result, Err(ClusterError::NoSuchNode(_))) {
            self.locks.forget(address);
        }
    }

    pub(crate) fn report_failure_in_background(&self, address: &str, cause: String) {
        let cluster = self.clone();
        let address = address.to_string();
        tokio::spawn(async move {
            if let Err(e) = cluster.handle_node_error(&address, &cause, true).await {
                error!(%address, error = %e, "failed to record node failure");
            }
        });
    }
}

impl NodeSource for Cluster {
    fn available_nodes(&self) -> StorageResult<Vec<Node>> {
        let now = Utc::now();
        Ok(self
            .storage
            .retrieve_nodes()?
            .into_iter()
            .filter(|node| node.is_available_at(now))
            .collect())
    }
}

/// Undoes `start_healing` when an episode ends early.
///
/// Owns the node lock for the rest of the episode. Storage calls are
/// synchronous, so the reset runs inside `drop`, before the lock is
/// released.
struct HealingReset<'a> {
    storage: &'a dyn Storage,
    address: &'a str,
    armed: bool,
    _lock: OwnedMutexGuard<()>,
}

impl<'a> HealingReset<'a> {
    fn new(storage: &'a dyn Storage, address: &'a str, lock: OwnedMutexGuard<()>) -> Self {
        Self {
            storage,
            address,
            armed: true,
            _lock: lock,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for HealingReset<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let address = self.address;
        let mut node = match self.storage.retrieve_node(address) {
            Ok(node) if node.is_healing() => node,
            Ok(_) => return,
            Err(e) => {
                debug!(%address, error = %e, "no healing mark to clear");
                return;
            }
        };
        node.finish_healing();
        match self.storage.update_node(&node) {
            Ok(()) => warn!(%address, "healing episode abandoned, healing mark cleared"),
            Err(e) => error!(%address, error = %e, "failed to clear abandoned healing mark"),
        }
    }
}

/// `now + d`, saturating at the latest representable instant.
fn after(now: DateTime<Utc>, d: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(d)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
