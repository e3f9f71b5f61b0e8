use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use haul_sync::domain::value_objects::RecordId;
use haul_sync::infrastructure::offline::{MirrorCache, SqliteMutationQueue};
use haul_sync::{AppConfig, MutationQueue};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "haul-sync-queue")]
#[command(about = "Inspect and maintain the offline mutation queue", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Data directory holding the queue database and mirror file
    #[arg(short, long, env = "HAUL_SYNC_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "warn", env = "LOG_LEVEL")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Show queue and mirror sizes
    Status,
    /// Print every queued mutation as JSON
    List,
    /// Print the mirror cache as JSON
    Mirror,
    /// Drop the queued mutation for one record
    Remove {
        record_id: String,
    },
    /// Empty the mirror cache
    ClearMirror,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let mut config = AppConfig::from_env();
    if let Some(data_dir) = cli.data_dir {
        config.storage.data_dir = data_dir;
    }
    config
        .validate()
        .map_err(|err| anyhow::anyhow!("invalid configuration: {err}"))?;

    let queue = SqliteMutationQueue::from_config(&config.storage);
    let result = run(cli.command, &config, &queue).await;
    queue.close().await;
    result
}

async fn run(command: Commands, config: &AppConfig, queue: &SqliteMutationQueue) -> Result<()> {
    match command {
        Commands::Status => {
            let queued = queue.len().await.context("failed to read queue")?;
            let mirror = MirrorCache::from_config(&config.storage).await;
            println!("queue:  {} ({})", queued, config.storage.queue_path().display());
            println!(
                "mirror: {} ({})",
                mirror.len().await,
                config.storage.mirror_path().display()
            );
        }
        Commands::List => {
            let records = queue.get_all().await.context("failed to read queue")?;
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        Commands::Mirror => {
            let mirror = MirrorCache::from_config(&config.storage).await;
            println!("{}", serde_json::to_string_pretty(&mirror.get_cached_docs().await)?);
        }
        Commands::Remove { record_id } => {
            let record_id = RecordId::new(record_id).map_err(anyhow::Error::msg)?;
            let existed = queue.get(&record_id).await?.is_some();
            queue.remove(&record_id).await?;
            if existed {
                info!("Removed queued mutation for {}", record_id);
                println!("removed {record_id}");
            } else {
                println!("{record_id} was not queued");
            }
        }
        Commands::ClearMirror => {
            let mirror = MirrorCache::from_config(&config.storage).await;
            let count = mirror.len().await;
            mirror.clear_all_cached_docs().await?;
            println!("cleared {count} mirror documents");
        }
    }
    Ok(())
}

fn init_logging(level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();
}
