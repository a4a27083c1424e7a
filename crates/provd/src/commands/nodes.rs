use std::io::Write;

use anyhow::Context;
use chrono::{DateTime, Utc};

use provgrid_cluster::{Cluster, Node, NodeUpdate};
use provgrid_state::{CreationStatus, format_timestamp};

pub fn list(cluster: &Cluster, all: bool, json: bool, out: &mut impl Write) -> anyhow::Result<()> {
    let nodes = if all {
        cluster.unfiltered_nodes()?
    } else {
        cluster.nodes()?
    };

    if json {
        writeln!(out, "{}", serde_json::to_string_pretty(&nodes)?)?;
        return Ok(());
    }

    let now = Utc::now();
    let width = nodes
        .iter()
        .map(|n| n.address.len())
        .max()
        .unwrap_or(0)
        .max("ADDRESS".len());
    writeln!(out, "{:<width$}  {:<8}  {:>8}  STATE", "ADDRESS", "STATUS", "FAILURES")?;
    for node in &nodes {
        writeln!(
            out,
            "{:<width$}  {:<8}  {:>8}  {}",
            node.address,
            node.creation_status,
            node.failure_count,
            node_state(node, now)
        )?;
    }
    Ok(())
}

pub fn show(cluster: &Cluster, address: &str, out: &mut impl Write) -> anyhow::Result<()> {
    let node = cluster.node(address)?;
    writeln!(out, "{}", serde_json::to_string_pretty(&node)?)?;
    Ok(())
}

pub fn register(
    cluster: &Cluster,
    address: &str,
    metadata: Vec<(String, String)>,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    let mut node = Node::new(address);
    node.metadata.extend(metadata.into_iter().filter(|(_, v)| !v.is_empty()));
    cluster
        .register(node)
        .with_context(|| format!("registering {address}"))?;
    writeln!(out, "registered {address}")?;
    Ok(())
}

pub fn unregister(cluster: &Cluster, address: &str, out: &mut impl Write) -> anyhow::Result<()> {
    cluster.unregister(address)?;
    writeln!(out, "unregistered {address}")?;
    Ok(())
}

pub fn update(
    cluster: &Cluster,
    address: &str,
    metadata: Vec<(String, String)>,
    status: Option<CreationStatus>,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    let mut update = NodeUpdate::new(address);
    update.metadata.extend(metadata);
    update.creation_status = status;

    let node = cluster.update_node(update)?;
    writeln!(out, "{}", serde_json::to_string_pretty(&node)?)?;
    Ok(())
}

pub async fn set_status(
    cluster: &Cluster,
    address: &str,
    status: CreationStatus,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    let node = cluster.override_creation_status(address, status).await?;
    writeln!(out, "{} is now {}", node.address, node.creation_status)?;
    Ok(())
}

pub fn recover(cluster: &Cluster, out: &mut impl Write) -> anyhow::Result<()> {
    let recovered = cluster.recover_stale_healing()?;
    if recovered.is_empty() {
        writeln!(out, "no stale healing locks")?;
    }
    for address in recovered {
        writeln!(out, "recovered {address}")?;
    }
    Ok(())
}

/// One-word health summary for the table view.
fn node_state(node: &Node, now: DateTime<Utc>) -> String {
    if node.is_healing() {
        return "healing".to_string();
    }
    match node.disabled_until() {
        Some(until) if until > now => format!("disabled until {}", format_timestamp(until)),
        _ => "available".to_string(),
    }
}
