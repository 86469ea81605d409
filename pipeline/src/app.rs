//! Application bootstrap and worker dispatch

use std::sync::Arc;

use anyhow::Result;

use crate::core::cli::{self, Commands};
use crate::core::constants::{APP_NAME_LOWER, ENV_LOG};
use crate::core::WorkerConfig;
use crate::providers::ProviderRegistry;
use crate::workers::tasks::{
    CaptioningTask, FaceTask, ModerationTask, SceneTask, TaggingTask,
};
use crate::workers::{
    run_aggregator, run_analysis_worker, run_dlq_processor, run_indexer,
};

/// Parse the CLI, load configuration, and run the selected worker process
/// until shutdown. Any error here exits the process non-zero.
pub async fn run() -> Result<()> {
    dotenvy::dotenv().ok();
    init_logging();

    let (cli_config, command) = cli::parse();
    let config = WorkerConfig::load();

    tracing::debug!(command = ?command, "Worker selected");

    let registry = ProviderRegistry::new(config.embedding_dim);

    match command {
        Commands::Moderation => {
            let task = Arc::new(ModerationTask::from_registry(&registry)?);
            run_analysis_worker(task, config, &cli_config).await
        }
        Commands::Tagging => {
            let task = Arc::new(TaggingTask::from_registry(&registry)?);
            run_analysis_worker(task, config, &cli_config).await
        }
        Commands::Scene => {
            let task = Arc::new(SceneTask::from_registry(&registry)?);
            run_analysis_worker(task, config, &cli_config).await
        }
        Commands::Captioning => {
            let task = Arc::new(CaptioningTask::from_registry(&registry)?);
            run_analysis_worker(task, config, &cli_config).await
        }
        Commands::Face => {
            let task = Arc::new(FaceTask::from_registry(&registry)?);
            run_analysis_worker(task, config, &cli_config).await
        }
        Commands::Aggregator => run_aggregator(config, &cli_config).await,
        Commands::Indexer => run_indexer(config, &cli_config).await,
        Commands::DlqProcessor => run_dlq_processor(config, &cli_config).await,
    }
}

fn init_logging() {
    let default_filter = format!("info,{}=info", APP_NAME_LOWER);

    let filter = std::env::var(ENV_LOG)
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or(default_filter);

    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(false)
        .with_level(true)
        .with_ansi(true)
        .compact()
        .with_env_filter(filter)
        .init();
}
