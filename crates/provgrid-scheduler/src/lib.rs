//! provgrid-scheduler — picks the node a unit of work runs on.
//!
//! The scheduler never reads storage itself. It is handed a
//! [`NodeSource`] (the cluster) and asks it for the nodes eligible right
//! now, so healing and disabled nodes are already filtered out.
//!
//! # Architecture
//!
//! ```text
//! Cluster ──implements──▶ NodeSource
//!    │                        ▲
//!    └── Arc<dyn Scheduler> ──┘ schedule(source, intent, filter)
//!            └── RoundRobinScheduler (atomic cursor over list positions)
//! ```

pub mod error;
pub mod round_robin;
pub mod scheduler;

pub use error::{SchedulerError, SchedulerResult};
pub use round_robin::RoundRobinScheduler;
pub use scheduler::{NodeFilter, NodeSource, Scheduler, SchedulingIntent};
