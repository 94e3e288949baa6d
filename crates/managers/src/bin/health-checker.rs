//! health-checker — pings managers and tracks component liveness.

use std::time::Duration;

use clap::Parser;
use tracing::info;

use lookout_bus::run_with_restarts;
use lookout_core::{load_dotenv, Environment};
use lookout_managers::HealthChecker;

/// Health checker worker.
#[derive(Parser, Debug)]
#[command(name = "health-checker", version, about)]
struct Cli {
    #[arg(long, env = "HEALTH_CHECKER_NAME", default_value = "health-checker")]
    name: String,

    /// Seconds between pings.
    #[arg(long, env = "HEALTH_CHECK_PERIOD_SECONDS", default_value_t = 30)]
    period: u64,
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
    let mut worker = HealthChecker::new(cli.name, &env, Duration::from_secs(cli.period));
    run_with_restarts(&mut worker).await;
    info!("health-checker exited");
    Ok(())
}
