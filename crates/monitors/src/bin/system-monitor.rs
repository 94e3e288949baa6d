//! system-monitor — polls a node-exporter endpoint for one host.

use std::time::Duration;

use clap::Parser;
use tracing::info;

use lookout_bus::{run_with_restarts, Transport};
use lookout_core::{load_dotenv, EntityId, EntityKind, Environment};
use lookout_monitors::system::SystemMonitor;
use lookout_monitors::MonitorWorker;

/// System monitor worker.
#[derive(Parser, Debug)]
#[command(name = "system-monitor", version, about)]
struct Cli {
    /// Entity id of the monitored host.
    #[arg(long, env = "SYSTEM_ID")]
    system_id: String,

    /// Human-readable host name.
    #[arg(long, env = "SYSTEM_NAME")]
    system_name: String,

    /// Chain/realm this host belongs to.
    #[arg(long, env = "PARENT_ID")]
    parent_id: String,

    /// node-exporter metrics endpoint.
    #[arg(long, env = "SYSTEM_METRICS_URL")]
    metrics_url: String,
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
    let name = format!("system-monitor ({})", cli.system_name);
    let entity = EntityId::new(
        EntityKind::System,
        cli.system_id,
        cli.system_name,
        cli.parent_id,
    );
    let monitor = SystemMonitor::new(
        name,
        entity,
        cli.metrics_url,
        Duration::from_secs(env.system_monitor_period),
    );

    let broker = Transport::tcp(env.broker_host.clone(), env.broker_port);
    let mut worker = MonitorWorker::new(monitor, broker);
    run_with_restarts(&mut worker).await;
    info!("system-monitor exited");
    Ok(())
}
