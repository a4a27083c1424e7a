//! provgrid-health — failure handling policies for provgrid nodes.
//!
//! A [`Healer`] is consulted once per failure-handling episode. It sees
//! the node with its failure bookkeeping already updated and answers how
//! long the node should stay out of rotation. The cluster turns that
//! answer into the node's `DisabledUntil` metadata.
//!
//! # Policies
//!
//! ```text
//! NoopHealer     always 0 (failures are recorded, nothing is disabled)
//! FixedHealer    same period for every failure
//! BackoffHealer  0 below a failure threshold, then base * 2^n capped at max
//! ```
//!
//! A single successful operation resets the node's failure count, which
//! brings a `BackoffHealer` back to its base period.

pub mod healer;

pub use healer::{
    healer_from_settings, BackoffHealer, BoxFuture, FixedHealer, Healer, NoopHealer,
};
