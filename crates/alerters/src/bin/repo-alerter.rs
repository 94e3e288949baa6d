//! repo-alerter — release announcements and accessibility transitions.

use clap::Parser;
use tracing::info;

use lookout_alerters::repo::RepoAlerter;
use lookout_alerters::AlerterWorker;
use lookout_bus::run_with_restarts;
use lookout_core::{load_dotenv, Environment};

/// Repository alerter worker.
#[derive(Parser, Debug)]
#[command(name = "repo-alerter", version, about)]
struct Cli {
    #[arg(long, env = "ALERTER_NAME", default_value = "repo-alerter")]
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
    let mut worker = AlerterWorker::new(RepoAlerter::new(cli.name), env);
    run_with_restarts(&mut worker).await;
    info!("repo-alerter exited");
    Ok(())
}
