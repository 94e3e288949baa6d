//! store-worker — persists transformer output into Redis.
//!
//! Consumes the store exchange (save payloads) and `ComponentReset`
//! control alerts; acks only after the write or purge succeeded.

use clap::Parser;
use tracing::info;

use lookout_bus::run_with_restarts;
use lookout_core::{load_dotenv, Environment};
use lookout_store::StoreWorker;

/// Store worker for the lookout pipeline.
#[derive(Parser, Debug)]
#[command(name = "store-worker", version, about)]
struct Cli {
    /// Worker name used in heartbeats and logs.
    #[arg(long, env = "STORE_WORKER_NAME", default_value = "store-worker")]
    name: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();
    let env = Environment::from_env()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(env.logging_level.clone())),
        )
        .init();
    env.log_summary();

    let cli = Cli::parse();
    let mut worker = StoreWorker::new(cli.name, env);
    run_with_restarts(&mut worker).await;
    info!("store-worker exited");
    Ok(())
}
