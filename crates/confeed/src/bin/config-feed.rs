//! config-feed — watches the config tree and fans documents out.

use std::time::Duration;

use clap::Parser;
use tracing::info;

use lookout_bus::{run_with_restarts, Transport};
use lookout_confeed::ConfigFeedWorker;
use lookout_core::{load_dotenv, Environment};

/// Config fan-out worker.
#[derive(Parser, Debug)]
#[command(name = "config-feed", version, about)]
struct Cli {
    #[arg(long, env = "CONFIG_FEED_NAME", default_value = "config-feed")]
    name: String,

    /// Root of the watched config tree.
    #[arg(long, env = "CONFIG_ROOT", default_value = "config")]
    root: String,

    /// Seconds between directory polls.
    #[arg(long, env = "CONFIG_POLL_PERIOD_SECONDS", default_value_t = 5)]
    poll_period: u64,
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
    let broker = Transport::tcp(env.broker_host.clone(), env.broker_port);
    let mut worker = ConfigFeedWorker::new(
        cli.name,
        cli.root,
        broker,
        Duration::from_secs(cli.poll_period),
    );
    run_with_restarts(&mut worker).await;
    info!("config-feed exited");
    Ok(())
}
