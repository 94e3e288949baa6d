//! monitors-manager — supervises per-chain monitor workers.
//!
//! Config-driven: follows the `chains.#.nodes_config` subtree of the
//! config fan-out, spawning node monitors and one contract observer per
//! configured chain.

use clap::Parser;
use tracing::info;

use lookout_bus::run_with_restarts;
use lookout_core::{load_dotenv, Environment};
use lookout_managers::{ManagerWorker, MonitorsFamily};

/// Monitors manager.
#[derive(Parser, Debug)]
#[command(name = "monitors-manager", version, about)]
struct Cli {
    #[arg(long, env = "MANAGER_NAME", default_value = "monitors-manager")]
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

    let cli = Cli::parse();
    let mut worker = ManagerWorker::new(MonitorsFamily::new(cli.name), env);
    run_with_restarts(&mut worker).await;
    info!("monitors-manager exited");
    Ok(())
}
