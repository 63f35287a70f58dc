//! chainscraper CLI: run the scraper and manage its state.
//!
//! # Commands
//! ```text
//! chainscraper run          --config <config.yaml>
//! chainscraper check-config --config <config.yaml>
//! chainscraper status       --config <config.yaml> [--json]
//! chainscraper reset        --config <config.yaml> --yes
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use chainscraper_core::checkpoint::{CheckpointManager, DocumentCheckpointStore};
use chainscraper_core::inspector::Inspector;
use chainscraper_core::notify::{Notifier, NullNotifier};
use chainscraper_core::pipeline::enabled_directions;
use chainscraper_core::{Pipeline, QueueNames, ScraperConfig};
use chainscraper_steem::{SteemRpcLedger, WebhookNotifier};
use chainscraper_storage::{MongoDocumentStore, RedisQueue};

mod logging;

#[derive(Parser)]
#[command(
    name = "chainscraper",
    about = "Steem/Golos operation scraper: materialises posts, comments and payouts into MongoDB",
    version
)]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, global = true, env = "CHAINSCRAPER_CONFIG", default_value = "config.yaml")]
    config: PathBuf,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run producers, workers, the consolidator and the inspector until Ctrl-C
    Run,

    /// Load and validate the configuration, then print a summary
    #[command(name = "check-config")]
    CheckConfig,

    /// Print the checkpoint and queue depths
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Put the checkpoint back to its initial value
    Reset {
        /// Confirm the reset
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = ScraperConfig::from_file(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    logging::init(&config.logging, cli.verbose);

    match cli.command {
        Commands::Run => cmd_run(Arc::new(config)).await,
        Commands::CheckConfig => cmd_check_config(&config),
        Commands::Status { json } => cmd_status(&config, json).await,
        Commands::Reset { yes } => cmd_reset(&config, yes).await,
    }
}

async fn cmd_run(config: Arc<ScraperConfig>) -> Result<()> {
    let ledger = Arc::new(SteemRpcLedger::from_config(&config.chain).context("building ledger client")?);
    let store = Arc::new(connect_store(&config).await?);
    let queue = Arc::new(connect_queue(&config).await?);
    let notifier: Arc<dyn Notifier> = match WebhookNotifier::from_config(&config.notification)? {
        Some(webhook) => Arc::new(webhook),
        None => Arc::new(NullNotifier),
    };

    tracing::info!(
        chain = %config.chain.name,
        directions = ?enabled_directions(&config),
        workers = config.scraper.workers_per_direction,
        "starting chainscraper"
    );
    let mut handle = Pipeline::new(config, ledger, store, queue, notifier).spawn();

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("listening for Ctrl-C")?;
            tracing::info!("shutdown requested");
        }
        _ = handle.wait() => {
            tracing::warn!("every pipeline task has ended");
        }
    }
    handle.shutdown().await;
    Ok(())
}

fn cmd_check_config(config: &ScraperConfig) -> Result<()> {
    println!("chain:        {} ({} node(s))", config.chain.name, config.chain.nodes.len());
    println!("directions:   {:?}", enabled_directions(config));
    println!("workers:      {} per direction", config.scraper.workers_per_direction);
    println!("mongo:        {}/{}", config.mongo.uri, config.mongo.database);
    println!("redis prefix: {}", config.redis.key_prefix);
    println!("apps:");
    for (name, app) in &config.apps {
        println!("  {name:<12} posts={} comments={} rule={:?}", app.posts, app.comments, app.content_rule);
    }
    println!("notifications: {}", if config.notification.send { "on" } else { "off" });
    println!("configuration OK");
    Ok(())
}

async fn cmd_status(config: &ScraperConfig, json: bool) -> Result<()> {
    let store = Arc::new(connect_store(config).await?);
    let queue = Arc::new(connect_queue(config).await?);
    let inspector = Inspector::new(
        queue,
        QueueNames::new(config.redis.key_prefix.clone()),
        checkpoint_manager(config, store),
        config.scraper.inspector_interval(),
    );
    let report = inspector.report().await.context("collecting status")?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{report}");
    }
    Ok(())
}

async fn cmd_reset(config: &ScraperConfig, yes: bool) -> Result<()> {
    if !yes {
        bail!("refusing to reset the checkpoint without --yes");
    }
    let store = Arc::new(connect_store(config).await?);
    checkpoint_manager(config, store).reset().await.context("resetting checkpoint")?;
    println!("checkpoint reset; both directions restart from the chain head");
    Ok(())
}

async fn connect_store(config: &ScraperConfig) -> Result<MongoDocumentStore> {
    let store = MongoDocumentStore::connect(&config.mongo.uri, &config.mongo.database)
        .await
        .context("connecting to mongodb")?;
    store.ping().await.context("pinging mongodb")?;
    Ok(store)
}

async fn connect_queue(config: &ScraperConfig) -> Result<RedisQueue> {
    RedisQueue::connect(&config.redis.url).await.context("connecting to redis")
}

fn checkpoint_manager(config: &ScraperConfig, store: Arc<MongoDocumentStore>) -> CheckpointManager {
    CheckpointManager::new(Arc::new(DocumentCheckpointStore::new(store, config.collections.settings.clone())))
}
