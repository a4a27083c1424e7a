//! provgrid-cluster — the node registry facade.
//!
//! [`Cluster`] owns a [`Storage`](provgrid_state::Storage), an optional
//! [`Scheduler`](provgrid_scheduler::Scheduler) and a
//! [`Healer`](provgrid_health::Healer), and is the only thing provisioners
//! talk to.
//!
//! # Architecture
//!
//! ```text
//! Cluster (Clone, shared across tasks)
//!   ├── Arc<dyn Storage>      registry records, registration order
//!   ├── NodeLocks             address → async mutex, no global lock
//!   │     ├── try_lock: update_node, handle_node_success
//!   │     └── lock:     handle_node_error, override_creation_status
//!   ├── Arc<dyn Healer>       consulted once per failure episode
//!   ├── Arc<dyn Scheduler>    schedule() over the available view
//!   └── executors             run_on_nodes (fan-out), run_on_node,
//!                             run_on_scheduled (schedule + retry)
//! ```
//!
//! # Health
//!
//! A reported failure marks the node healing (hidden from `nodes()`),
//! asks the healer for a disable period and stores it as the
//! `DisabledUntil` metadata key. Expiry is lazy: every read compares
//! `DisabledUntil` to the clock, there is no sweeper task.

pub mod cluster;
pub mod error;
pub mod executor;
mod locks;
pub mod update;

pub use cluster::Cluster;
pub use error::{ClusterError, ClusterResult, NodeError, NodeOpError};
pub use update::NodeUpdate;

pub use provgrid_scheduler::{NodeFilter, SchedulingIntent};
pub use provgrid_state::{CreationStatus, HealingData, Metadata, Node};
