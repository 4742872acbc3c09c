use std::{path::PathBuf, sync::Arc};

use clap::Parser;
use engram::{
    cache::{self, EpochCache},
    config::ServiceConfig,
    crypto::PlaintextCipher,
    db::DbPool,
    resumer::ResponseResumer,
    retention::start_eviction_worker,
    store::ConversationStore,
};
use tokio_util::task::TaskTracker;

#[derive(Parser, Debug)]
#[command(name = "engram", about = "Conversation memory service", version)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "engram.toml")]
    config: PathBuf,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = ServiceConfig::from_file(&args.config)?;

    let db = Arc::new(DbPool::from_config(&config.database).await?);
    db.run_migrations().await?;
    db.health_check().await?;
    tracing::info!("Database ready");

    let shared_cache = cache::from_config(&config.cache)?;
    let epoch_cache = shared_cache
        .as_ref()
        .map(|cache| EpochCache::new(Arc::clone(cache), config.epoch_cache.ttl()));

    let store = Arc::new(ConversationStore::new(
        Arc::clone(&db),
        Arc::new(PlaintextCipher),
        epoch_cache,
        None,
    ));

    let resumer = Arc::new(ResponseResumer::new(config.resumer.clone(), shared_cache).await?);
    tracing::info!(enabled = resumer.enabled(), "Response resumer ready");

    let tracker = TaskTracker::new();
    tracker.spawn(start_eviction_worker(
        Arc::clone(&store),
        config.retention.clone(),
    ));
    tracker.spawn(Arc::clone(&resumer).run_sweeper());

    tracing::info!("Service started; waiting for shutdown signal");
    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down");
    resumer.shutdown().await;
    tracker.close();

    Ok(())
}
