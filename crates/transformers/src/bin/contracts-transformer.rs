//! contracts-transformer — stateful transformation of observer output.

use clap::Parser;
use tracing::info;

use lookout_bus::run_with_restarts;
use lookout_core::{load_dotenv, Environment};
use lookout_transformers::contracts::ContractsTransformer;
use lookout_transformers::TransformerWorker;

/// Chainlink contracts data transformer worker.
#[derive(Parser, Debug)]
#[command(name = "contracts-transformer", version, about)]
struct Cli {
    #[arg(long, env = "TRANSFORMER_NAME", default_value = "contracts-transformer")]
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
    let mut worker = TransformerWorker::new(ContractsTransformer::new(cli.name), env);
    run_with_restarts(&mut worker).await;
    info!("contracts-transformer exited");
    Ok(())
}
