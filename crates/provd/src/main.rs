//! provd — provgrid admin CLI.
//!
//! Opens the persistent node registry and runs one administrative
//! command against it.
//!
//! # Usage
//!
//! ```text
//! provd --data-dir /var/lib/provgrid nodes list --all
//! provd nodes register http://10.0.0.1:4243 --meta pool=east
//! provd nodes set-status http://10.0.0.1:4243 created
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use provgrid_state::CreationStatus;

mod commands;

#[derive(Parser)]
#[command(
    name = "provd",
    about = "provgrid — multi-cloud provisioning node registry",
    version,
    propagate_version = true
)]
struct Cli {
    /// provgrid.toml to load.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding the registry database. Overrides [storage].path.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect and edit registered nodes.
    Nodes {
        #[command(subcommand)]
        action: NodesAction,
    },
    /// Print the effective configuration.
    Config,
}

#[derive(Subcommand)]
enum NodesAction {
    /// List nodes in registration order.
    List {
        /// Include healing and disabled nodes.
        #[arg(long)]
        all: bool,
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// Show one node as JSON.
    Show { address: String },
    /// Register a node.
    Register {
        address: String,
        /// Metadata pair, repeatable.
        #[arg(long = "meta", value_parser = commands::parse_key_val)]
        metadata: Vec<(String, String)>,
    },
    /// Remove a node.
    Unregister { address: String },
    /// Merge metadata and optionally set the status. An empty value
    /// (`--meta key=`) deletes the key.
    Update {
        address: String,
        #[arg(long = "meta", value_parser = commands::parse_key_val)]
        metadata: Vec<(String, String)>,
        #[arg(long)]
        status: Option<CreationStatus>,
    },
    /// Force the creation status, including out of `error`.
    SetStatus {
        address: String,
        status: CreationStatus,
    },
    /// Clear healing marks left behind by a crashed process.
    Recover,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,provd=debug,provgrid=debug".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = commands::load_config(cli.config.as_deref())?;
    let mut out = std::io::stdout().lock();

    match cli.command {
        Commands::Config => commands::config::show(&config, &mut out),
        Commands::Nodes { action } => {
            let cluster = commands::open_cluster(&config, cli.data_dir.as_deref())?;
            match action {
                NodesAction::List { all, json } => {
                    commands::nodes::list(&cluster, all, json, &mut out)
                }
                NodesAction::Show { address } => {
                    commands::nodes::show(&cluster, &address, &mut out)
                }
                NodesAction::Register { address, metadata } => {
                    commands::nodes::register(&cluster, &address, metadata, &mut out)
                }
                NodesAction::Unregister { address } => {
                    commands::nodes::unregister(&cluster, &address, &mut out)
                }
                NodesAction::Update {
                    address,
                    metadata,
                    status,
                } => commands::nodes::update(&cluster, &address, metadata, status, &mut out),
                NodesAction::SetStatus { address, status } => {
                    commands::nodes::set_status(&cluster, &address, status, &mut out).await
                }
                NodesAction::Recover => commands::nodes::recover(&cluster, &mut out),
            }
        }
    }
}
