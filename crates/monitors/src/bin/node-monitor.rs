//! node-monitor — polls one Chainlink node's Prometheus endpoints.

use std::time::Duration;

use clap::Parser;
use tracing::info;

use lookout_bus::{run_with_restarts, Transport};
use lookout_core::{load_dotenv, EntityId, EntityKind, Environment};
use lookout_monitors::node::ChainlinkNodeMonitor;
use lookout_monitors::MonitorWorker;

/// Chainlink node monitor worker.
#[derive(Parser, Debug)]
#[command(name = "node-monitor", version, about)]
struct Cli {
    #[arg(long, env = "NODE_ID")]
    node_id: String,

    #[arg(long, env = "NODE_NAME")]
    node_name: String,

    #[arg(long, env = "PARENT_ID")]
    parent_id: String,

    /// Prometheus endpoints, tried in order (active/standby pairs).
    #[arg(long, env = "NODE_PROMETHEUS_URLS", value_delimiter = ',')]
    prometheus_urls: Vec<String>,
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
    let name = format!("node-monitor ({})", cli.node_name);
    let entity = EntityId::new(
        EntityKind::ChainlinkNode,
        cli.node_id,
        cli.node_name,
        cli.parent_id,
    );
    let monitor = ChainlinkNodeMonitor::new(
        name,
        entity,
        cli.prometheus_urls,
        Duration::from_secs(env.node_monitor_period),
    )?;

    let broker = Transport::tcp(env.broker_host.clone(), env.broker_port);
    let mut worker = MonitorWorker::new(monitor, broker);
    run_with_restarts(&mut worker).await;
    info!("node-monitor exited");
    Ok(())
}
