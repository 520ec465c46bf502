use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;

use batchops_core::kv::RedisStore;
use batchops_core::repository::PostgresDb;
use batchops_core::{Clock, Config, Engine, FileStorage, Repositories, SystemClock};

#[derive(Parser)]
#[command(name = "batchops")]
#[command(about = "BatchOps batch processing engine")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, global = true, help = "Configuration file path")]
    config: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Set log level")]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the engine: scheduler loop plus worker pool
    Run,

    /// Database operations
    Db {
        #[command(subcommand)]
        command: DbCommands,
    },

    /// Validate the configuration and exit
    Check,

    /// Trigger a job by name, immediately
    Trigger {
        /// Job name
        name: String,

        /// Positional arguments, JSON-encoded
        #[arg(num_args = 0..)]
        args: Vec<String>,
    },
}

#[derive(Subcommand)]
enum DbCommands {
    /// Create missing enum types, tables and indexes
    Init,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load(&path.to_string_lossy()).context("loading configuration")?,
        None => Config::from_env().context("loading configuration")?,
    };

    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .init();

    match cli.command {
        Commands::Check => {
            config.validate().context("invalid configuration")?;
            println!("configuration ok");
            Ok(())
        }
        Commands::Db { command } => match command {
            DbCommands::Init => {
                let db = PostgresDb::connect(&config.database).await?;
                db.init_schema().await?;
                println!("schema initialised");
                Ok(())
            }
        },
        Commands::Run => run_engine(config).await,
        Commands::Trigger { name, args } => {
            let engine = build_engine(&config).await?;
            let parsed = args
                .iter()
                .map(|raw| {
                    serde_json::from_str(raw)
                        .unwrap_or_else(|_| serde_json::Value::String(raw.clone()))
                })
                .collect();
            engine.trigger(&name, parsed).await?;
            println!("triggered '{}'", name);
            Ok(())
        }
    }
}

async fn build_engine(config: &Config) -> anyhow::Result<Engine> {
    let db = PostgresDb::connect(&config.database)
        .await
        .context("connecting to database")?;
    let repos = Repositories::postgres(db);

    let kv = RedisStore::connect(&config.kv)
        .await
        .context("connecting to key/value store")?;

    let storage = FileStorage::new(config.storage.root.clone());
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let engine = Engine::new(
        repos,
        Arc::new(kv),
        storage,
        clock,
        config.engine.clone(),
        &config.kv.namespace,
        |_registry| {},
    )?;

    Ok(engine)
}

async fn run_engine(config: Config) -> anyhow::Result<()> {
    config.validate().context("invalid configuration")?;

    let engine = build_engine(&config).await?;
    engine.start().await.context("starting engine")?;

    info!("Engine running, Ctrl-C to stop");
    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;

    engine.shutdown().await;

    Ok(())
}
