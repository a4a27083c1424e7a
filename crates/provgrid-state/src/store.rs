//! RedbStorage — redb-backed persistence for the node registry.
//!
//! Nodes are JSON-serialized into redb's `&[u8]` value columns together
//! with their registration sequence number. A second table maps sequence
//! numbers back to addresses so listing preserves registration order.
//! Every mutation runs in a single write transaction, which gives the
//! per-call atomicity the [`Storage`] contract asks for.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{StorageError, StorageResult};
use crate::tables::*;
use crate::types::Node;
use crate::Storage;

/// Convert any `Display` error into a `StorageError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StorageError::$variant(e.to_string())
    };
}

/// Value stored in the `nodes` table.
#[derive(Serialize, Deserialize)]
struct StoredNode {
    seq: u64,
    node: Node,
}

fn decode(bytes: &[u8]) -> StorageResult<StoredNode> {
    serde_json::from_slice(bytes).map_err(map_err!(Deserialize))
}

fn encode(stored: &StoredNode) -> StorageResult<Vec<u8>> {
    serde_json::to_vec(stored).map_err(map_err!(Serialize))
}

/// Thread-safe node storage backed by redb.
#[derive(Clone)]
pub struct RedbStorage {
    db: Arc<Database>,
}

impl RedbStorage {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "node store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory redb store.
    pub fn open_in_memory() -> StorageResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory node store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StorageResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(NODES).map_err(map_err!(Table))?;
        txn.open_table(NODE_ORDER).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }
}

impl Storage for RedbStorage {
    fn store_node(&self, node: &Node) -> StorageResult<()> {
        let key = node.address.as_str();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let seq;
        {
            let mut nodes = txn.open_table(NODES).map_err(map_err!(Table))?;
            let mut order = txn.open_table(NODE_ORDER).map_err(map_err!(Table))?;

            if nodes.get(key).map_err(map_err!(Read))?.is_some() {
                return Err(StorageError::DuplicateAddress(node.address.clone()));
            }

            seq = match order.last().map_err(map_err!(Read))? {
                Some((last, _)) => last.value() + 1,
                None => 0,
            };

            let value = encode(&StoredNode {
                seq,
                node: node.clone(),
            })?;
            nodes
                .insert(key, value.as_slice())
                .map_err(map_err!(Write))?;
            order.insert(seq, key).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(address = %key, seq, "node stored");
        Ok(())
    }

    fn retrieve_node(&self, address: &str) -> StorageResult<Node> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(NODES).map_err(map_err!(Table))?;
        match table.get(address).map_err(map_err!(Read))? {
            Some(guard) => Ok(decode(guard.value())?.node),
            None => Err(StorageError::NoSuchNode(address.to_string())),
        }
    }

    fn retrieve_nodes(&self) -> StorageResult<Vec<Node>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let nodes = txn.open_table(NODES).map_err(map_err!(Table))?;
        let order = txn.open_table(NODE_ORDER).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in order.iter().map_err(map_err!(Read))? {
            let (_, address) = entry.map_err(map_err!(Read))?;
            if let Some(guard) = nodes.get(address.value()).map_err(map_err!(Read))? {
                results.push(decode(guard.value())?.node);
            }
        }
        Ok(results)
    }

    fn update_node(&self, node: &Node) -> StorageResult<()> {
        let key = node.address.as_str();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut nodes = txn.open_table(NODES).map_err(map_err!(Table))?;
            let seq = match nodes.get(key).map_err(map_err!(Read))? {
                Some(guard) => decode(guard.value())?.seq,
                None => return Err(StorageError::NoSuchNode(node.address.clone())),
            };
            let value = encode(&StoredNode {
                seq,
                node: node.clone(),
            })?;
            nodes
                .insert(key, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn remove_node(&self, address: &str) -> StorageResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut nodes = txn.open_table(NODES).map_err(map_err!(Table))?;
            let mut order = txn.open_table(NODE_ORDER).map_err(map_err!(Table))?;
            let seq = match nodes.remove(address).map_err(map_err!(Write))? {
                Some(guard) => decode(guard.value())?.seq,
                None => return Err(StorageError::NoSuchNode(address.to_string())),
            };
            order.remove(seq).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%address, "node removed");
        Ok(())
    }
}
