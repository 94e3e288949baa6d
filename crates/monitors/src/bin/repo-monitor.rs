//! repo-monitor — polls a release feed for one repository.

use std::time::Duration;

use clap::Parser;
use tracing::info;

use lookout_bus::{run_with_restarts, Transport};
use lookout_core::{load_dotenv, EntityId, EntityKind, Environment};
use lookout_monitors::repo::RepoMonitor;
use lookout_monitors::MonitorWorker;

/// Repository release monitor worker.
#[derive(Parser, Debug)]
#[command(name = "repo-monitor", version, about)]
struct Cli {
    #[arg(long, env = "REPO_ID")]
    repo_id: String,

    #[arg(long, env = "REPO_NAME")]
    repo_name: String,

    #[arg(long, env = "PARENT_ID")]
    parent_id: String,

    /// Releases feed URL (GitHub API shaped).
    #[arg(long, env = "REPO_RELEASES_URL")]
    releases_url: String,
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
    let name = format!("repo-monitor ({})", cli.repo_name);
    let entity = EntityId::new(
        EntityKind::Repository,
        cli.repo_id,
        cli.repo_name,
        cli.parent_id,
    );
    let monitor = RepoMonitor::new(
        name,
        entity,
        cli.releases_url,
        Duration::from_secs(env.repo_monitor_period),
    );

    let broker = Transport::tcp(env.broker_host.clone(), env.broker_port);
    let mut worker = MonitorWorker::new(monitor, broker);
    run_with_restarts(&mut worker).await;
    info!("repo-monitor exited");
    Ok(())
}
