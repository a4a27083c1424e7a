//! provgrid-core — configuration shared by the provgrid crates.
//!
//! Parses `provgrid.toml` into [`ProvConfig`]. Each crate turns its own
//! section into runtime settings: the cluster reads [`ClusterSettings`],
//! the health crate builds a healer from [`HealerSettings`], and the
//! `provd` binary opens storage from [`StorageSettings`].

pub mod config;
pub mod duration;

pub use config::*;
pub use duration::{format_duration, parse_duration};
