use anyhow::{Context, Result};
use archivist::{Archiver, ArchiverConfig, EngineConfig, telemetry};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "archivist")]
#[command(about = "Moves finished workflow instances into dated archive indices")]
struct Cli {
    /// JSON configuration file
    #[arg(long, short)]
    config: Option<PathBuf>,
    #[arg(long)]
    node_id: Option<String>,
    /// Owned partitions, comma separated
    #[arg(long, value_delimiter = ',')]
    partitions: Vec<u32>,
    /// Elasticsearch base URL
    #[arg(long)]
    engine_url: Option<String>,
    #[arg(long)]
    retention_secs: Option<u64>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the archiver workers until interrupted
    Run,
    /// Drain every eligible batch once and exit
    Sweep,
    /// Validate the configuration and print it
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    telemetry::init();

    let config = load_config(&cli)?;
    match cli.command {
        Command::CheckConfig => {
            config.validate()?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Command::Sweep => {
            let archiver = Archiver::from_config(config)?;
            let archived = archiver.sweep_once().await?;
            println!("Archived {} records", archived);
            Ok(())
        }
        Command::Run => run(config).await,
    }
}

fn load_config(cli: &Cli) -> Result<ArchiverConfig> {
    let mut config = match &cli.config {
        Some(path) => ArchiverConfig::from_file(path)
            .with_context(|| format!("Failed to load config '{}'", path.display()))?,
        None => ArchiverConfig::default(),
    };

    if let Some(node_id) = &cli.node_id {
        config.node_id = node_id.clone();
    }
    if !cli.partitions.is_empty() {
        config.partitions = cli.partitions.clone();
    }
    if let Some(url) = &cli.engine_url {
        let timeout_ms = match &config.engine {
            EngineConfig::Elasticsearch { timeout_ms, .. } => *timeout_ms,
            EngineConfig::Memory => 30_000,
        };
        config.engine = EngineConfig::Elasticsearch {
            url: url.clone(),
            timeout_ms,
        };
    }
    if let Some(retention_secs) = cli.retention_secs {
        config = config.retention(Duration::from_secs(retention_secs));
    }
    Ok(config)
}

async fn run(config: ArchiverConfig) -> Result<()> {
    let archiver = Archiver::from_config(config)?;
    let worker = archiver.start();
    log::info!(
        "archiver '{}' running on partitions {:?}",
        archiver.config().node_id,
        archiver.config().partitions
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    log::info!("shutdown requested");

    archiver.shutdown();
    worker.stop().await?;
    Ok(())
}
