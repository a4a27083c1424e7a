//! provgrid.toml configuration parser.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::duration::{serde_duration, serde_opt_duration};

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("invalid duration: {0:?}")]
    InvalidDuration(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvConfig {
    pub cluster: ClusterSettings,
    pub healer: HealerSettings,
    pub storage: StorageSettings,
    /// Nodes registered when the cluster is built.
    pub nodes: Vec<NodeSeed>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterSettings {
    /// Advisory lifetime of a healing lock; past it a leftover lock can be reclaimed.
    #[serde(with = "serde_duration")]
    pub healing_lock_ttl: Duration,
    /// Upper bound on a broadcast query. Unbounded when absent.
    #[serde(
        with = "serde_opt_duration",
        skip_serializing_if = "Option::is_none"
    )]
    pub broadcast_timeout: Option<Duration>,
    /// Nodes tried by schedule-and-run before giving up.
    pub schedule_attempts: u32,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            healing_lock_ttl: Duration::from_secs(5 * 60),
            broadcast_timeout: None,
            schedule_attempts: 3,
        }
    }
}

/// Which healing policy to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealerKind {
    #[default]
    Noop,
    Fixed,
    Backoff,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealerSettings {
    pub kind: HealerKind,
    /// `fixed`: how long every failure disables a node.
    #[serde(with = "serde_duration")]
    pub disable_for: Duration,
    /// `backoff`: first disable period once the threshold is reached.
    #[serde(with = "serde_duration")]
    pub base: Duration,
    /// `backoff`: cap on the disable period.
    #[serde(with = "serde_duration")]
    pub max: Duration,
    /// `backoff`: failures tolerated before disabling.
    pub threshold: u32,
}

impl Default for HealerSettings {
    fn default() -> Self {
        Self {
            kind: HealerKind::Noop,
            disable_for: Duration::from_secs(60),
            base: Duration::from_secs(60),
            max: Duration::from_secs(30 * 60),
            threshold: 1,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// redb file. In-memory storage when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// A node declared in the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSeed {
    pub address: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl ProvConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}
