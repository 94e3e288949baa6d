//! alerters-manager — supervises the repository alerter.
//!
//! Pure singleton family: one child, with its `ComponentReset` published
//! before every (re)start.

use clap::Parser;
use tracing::info;

use lookout_bus::run_with_restarts;
use lookout_core::{load_dotenv, Environment};
use lookout_managers::{AlertersFamily, ManagerWorker};

/// Alerters manager.
#[derive(Parser, Debug)]
#[command(name = "alerters-manager", version, about)]
struct Cli {
    #[arg(long, env = "MANAGER_NAME", default_value = "alerters-manager")]
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
    let mut worker = ManagerWorker::new(AlertersFamily::new(cli.name), env);
    run_with_restarts(&mut worker).await;
    info!("alerters-manager exited");
    Ok(())
}
