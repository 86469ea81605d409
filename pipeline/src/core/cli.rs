use clap::{Parser, Subcommand};

use super::constants::{ENV_HEALTH_PORT, ENV_REDIS_URL};

#[derive(Parser)]
#[command(name = "lumen")]
#[command(version, about = "Media enrichment pipeline workers", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Bus (Redis) connection URL
    #[arg(long, global = true, env = ENV_REDIS_URL)]
    pub redis_url: Option<String>,

    /// Health/metrics HTTP port
    #[arg(long, global = true, env = ENV_HEALTH_PORT)]
    pub health_port: Option<u16>,

    /// Consumer name within the group (defaults to a generated unique name)
    #[arg(long, global = true)]
    pub consumer_name: Option<String>,
}

/// One worker process per subcommand; horizontal scale is achieved by
/// running multiple processes of the same subcommand under the same
/// consumer group with distinct consumer names.
#[derive(Subcommand, Clone, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Content-moderation analysis worker
    Moderation,
    /// Image-tagging analysis worker
    Tagging,
    /// Scene-recognition analysis worker
    Scene,
    /// Image-captioning analysis worker
    Captioning,
    /// Face-detection analysis worker
    Face,
    /// Post-level fan-in aggregator
    Aggregator,
    /// Search-store indexing worker
    Indexer,
    /// Dead-letter queue processor
    DlqProcessor,
}

/// Configuration derived from CLI arguments
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub redis_url: Option<String>,
    pub health_port: Option<u16>,
    pub consumer_name: Option<String>,
}

/// Parse CLI arguments and return config with the selected worker
pub fn parse() -> (CliConfig, Commands) {
    let cli = Cli::parse();
    let config = CliConfig {
        redis_url: cli.redis_url,
        health_port: cli.health_port,
        consumer_name: cli.consumer_name,
    };
    (config, cli.command)
}
