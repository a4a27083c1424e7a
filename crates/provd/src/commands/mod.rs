pub mod config;
pub mod nodes;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use tracing::{debug, info};

use provgrid_cluster::Cluster;
use provgrid_core::ProvConfig;
use provgrid_state::RedbStorage;

const DEFAULT_DATA_DIR: &str = "/var/lib/provgrid";
const DB_FILE: &str = "provgrid.redb";

/// Load `path`, or the defaults when no file is given.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<ProvConfig> {
    match path {
        Some(path) => {
            let config = ProvConfig::from_file(path)
                .with_context(|| format!("loading {}", path.display()))?;
            debug!(path = %path.display(), nodes = config.nodes.len(), "config loaded");
            Ok(config)
        }
        None => Ok(ProvConfig::default()),
    }
}

/// `--data-dir` wins over `[storage].path`, which wins over the default dir.
pub fn registry_path(config: &ProvConfig, data_dir: Option<&Path>) -> PathBuf {
    match (data_dir, &config.storage.path) {
        (Some(dir), _) => dir.join(DB_FILE),
        (None, Some(path)) => path.clone(),
        (None, None) => Path::new(DEFAULT_DATA_DIR).join(DB_FILE),
    }
}

pub fn open_cluster(config: &ProvConfig, data_dir: Option<&Path>) -> anyhow::Result<Cluster> {
    let path = registry_path(config, data_dir);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let storage = RedbStorage::open(&path)
        .with_context(|| format!("opening registry {}", path.display()))?;
    info!(path = %path.display(), "registry opened");

    Ok(Cluster::from_config(config, Arc::new(storage))?)
}

/// Parse a `key=value` argument. The value may be empty.
pub fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got {s:?}"))?;
    if key.is_empty() {
        return Err(format!("empty key in {s:?}"));
    }
    Ok((key.to_string(), value.to_string()))
}
