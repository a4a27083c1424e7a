//! redb table definitions for the node registry.

use redb::TableDefinition;

/// JSON-encoded `{seq, node}` records keyed by node address.
pub const NODES: TableDefinition<&str, &[u8]> = TableDefinition::new("nodes");

/// Registration order: sequence number → node address.
pub const NODE_ORDER: TableDefinition<u64, &str> = TableDefinition::new("node_order");
