//! provgrid-state — node registry state for provgrid.
//!
//! Holds the [`Node`] entity, the [`Storage`] contract every registry
//! backend implements, and two backends:
//!
//! - [`MemoryStorage`]: lock-guarded in-process map, the reference
//!   implementation and the test double used across the workspace.
//! - [`RedbStorage`]: persistent store backed by [redb](https://docs.rs/redb),
//!   JSON-encoded nodes in `&[u8]` value columns.
//!
//! # Architecture
//!
//! ```text
//! Storage (trait, every call atomic)
//!   ├── MemoryStorage  (RwLock<seq → Node> + address index)
//!   └── RedbStorage    (nodes: address → {seq, node}
//!                       node_order: seq → address)
//! ```
//!
//! Both backends return nodes in registration order; round-robin
//! scheduling depends on it.

pub mod error;
pub mod memory;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StorageError, StorageResult};
pub use memory::MemoryStorage;
pub use store::RedbStorage;
pub use types::*;

/// Persistence contract for the node set.
///
/// Each call is atomic on its own. Consistency across several calls
/// (read-modify-write of one node) is the caller's job; the cluster
/// supplies it with per-node locks.
pub trait Storage: Send + Sync {
    /// Insert a new node. Fails with [`StorageError::DuplicateAddress`]
    /// if the address is already stored.
    fn store_node(&self, node: &Node) -> StorageResult<()>;

    /// Fetch one node by address.
    fn retrieve_node(&self, address: &str) -> StorageResult<Node>;

    /// All nodes, in registration order.
    fn retrieve_nodes(&self) -> StorageResult<Vec<Node>>;

    /// Replace a stored node, keeping its registration position.
    fn update_node(&self, node: &Node) -> StorageResult<()>;

    /// Remove a node by address.
    fn remove_node(&self, address: &str) -> StorageResult<()>;
}
