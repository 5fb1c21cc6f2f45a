use clap::{Parser, Subcommand};

use crate::config::{NodeConfig, CONFIG_FILE_NAME};
use crate::error::NodeError;
use crate::node::{Collaborators, Node};

/// Online peers in the devnet.
const DEV_PEERS: usize = 8;
/// Member collections per devnet paranet.
const DEV_COLLECTIONS: u64 = 5;

#[derive(Parser)]
#[command(
    name = "trellis",
    about = "Trellis knowledge-graph node: command pipeline, quorum protocol and paranet sync",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the node
    Run {
        /// Path to config file
        #[arg(short, long, default_value = CONFIG_FILE_NAME)]
        config: String,
        /// Start against a seeded in-memory chain and peer network
        #[arg(long)]
        dev: bool,
        /// Storage backend: "memory" (default for --dev) or "sqlite"
        #[arg(long)]
        storage: Option<String>,
        /// Override data directory path
        #[arg(long)]
        data_dir: Option<String>,
    },
    /// Initialize a new node configuration
    Init {
        /// Output directory
        #[arg(short, long, default_value = ".")]
        dir: String,
    },
}

impl Cli {
    /// Log level to fall back on when `RUST_LOG` is unset: the configured
    /// one if the config file can be read, else "info".
    pub fn log_level(&self) -> String {
        match &self.command {
            Command::Run {
                config, dev: false, ..
            } => NodeConfig::load(config)
                .map(|c| c.logging.level)
                .unwrap_or_else(|_| "info".to_string()),
            _ => "info".to_string(),
        }
    }
}

pub async fn run(cli: Cli) -> Result<(), NodeError> {
    match cli.command {
        Command::Run {
            config,
            dev,
            storage,
            data_dir,
        } => {
            let (mut config, collaborators) = if dev {
                let devnet = crate::dev::seed(DEV_PEERS, DEV_COLLECTIONS);
                let mut cfg = NodeConfig::default();
                cfg.paranet.paranets = devnet.paranets.clone();
                cfg.paranet.sync_frequency_ms = 10_000;
                cfg.paranet.poll_interval_ms = 100;
                cfg.metrics.refresh_interval_ms = 5_000;
                let collaborators = Collaborators {
                    chain: devnet.chain,
                    network: devnet.network,
                };
                (cfg, collaborators)
            } else {
                (NodeConfig::load(&config)?, Collaborators::detached())
            };

            // Apply CLI overrides.
            if let Some(db) = storage {
                config.storage.db_type = db;
            }
            if let Some(dir) = data_dir {
                config.storage.data_dir = dir;
            }

            tracing::info!(
                mode = if dev { "dev" } else { "config" },
                storage = %config.storage.db_type,
                paranets = config.paranet.paranets.len(),
                "starting trellis node"
            );
            let node = Node::new(config, collaborators)?;
            node.run_until_ctrl_c().await
        }
        Command::Init { dir } => {
            NodeConfig::init(&dir)?;
            tracing::info!("Node configuration initialized in {}", dir);
            Ok(())
        }
    }
}
