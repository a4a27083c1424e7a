//! In-memory storage backend.

use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::debug;

use crate::error::{StorageError, StorageResult};
use crate::types::Node;
use crate::Storage;

/// Reference [`Storage`] implementation keyed by address.
///
/// Nodes are kept in a map ordered by a registration sequence number so
/// `retrieve_nodes` returns them in the order they were stored.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    next_seq: u64,
    /// seq → node
    nodes: BTreeMap<u64, Node>,
    /// address → seq
    index: HashMap<String, u64>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Storage for MemoryStorage {
    fn store_node(&self, node: &Node) -> StorageResult<()> {
        let mut inner = self.write();
        if inner.index.contains_key(&node.address) {
            return Err(StorageError::DuplicateAddress(node.address.clone()));
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.index.insert(node.address.clone(), seq);
        inner.nodes.insert(seq, node.clone());
        debug!(address = %node.address, seq, "node stored");
        Ok(())
    }

    fn retrieve_node(&self, address: &str) -> StorageResult<Node> {
        let inner = self.read();
        inner
            .index
            .get(address)
            .and_then(|seq| inner.nodes.get(seq))
            .cloned()
            .ok_or_else(|| StorageError::NoSuchNode(address.to_string()))
    }

    fn retrieve_nodes(&self) -> StorageResult<Vec<Node>> {
        Ok(self.read().nodes.values().cloned().collect())
    }

    fn update_node(&self, node: &Node) -> StorageResult<()> {
        let mut inner = self.write();
        let seq = *inner
            .index
            .get(&node.address)
            .ok_or_else(|| StorageError::NoSuchNode(node.address.clone()))?;
        inner.nodes.insert(seq, node.clone());
        Ok(())
    }

    fn remove_node(&self, address: &str) -> StorageResult<()> {
        let mut inner = self.write();
        let seq = inner
            .index
            .remove(address)
            .ok_or_else(|| StorageError::NoSuchNode(address.to_string()))?;
        inner.nodes.remove(&seq);
        debug!(%address, "node removed");
        Ok(())
    }
}
