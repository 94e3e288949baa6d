//! system-alerter — threshold and downtime rules over host snapshots.

use clap::Parser;
use tracing::info;

use lookout_alerters::system::SystemAlerter;
use lookout_alerters::AlerterWorker;
use lookout_bus::run_with_restarts;
use lookout_core::{load_dotenv, Environment};

/// System alerter worker.
#[derive(Parser, Debug)]
#[command(name = "system-alerter", version, about)]
struct Cli {
    #[arg(long, env = "ALERTER_NAME", default_value = "system-alerter")]
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
    let mut worker = AlerterWorker::new(SystemAlerter::new(cli.name), env);
    run_with_restarts(&mut worker).await;
    info!("system-alerter exited");
    Ok(())
}
