//! contracts-monitor — the Chainlink contract observer for one chain.
//!
//! The monitors manager spawns one of these per chain, passing the chain
//! slice of the config through `CONTRACTS_CONFIG`.

use std::time::Duration;

use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::client::RpcClient;
use alloy::transports::http::Http;
use clap::Parser;
use serde::Deserialize;
use tracing::info;

use lookout_bus::{run_with_restarts, Transport};
use lookout_core::{load_dotenv, Environment};
use lookout_monitors::contracts::{ContractsObserver, EvmSource, OperatorConfig};
use lookout_monitors::MonitorWorker;

/// Per-call timeout for EVM RPC requests.
const RPC_TIMEOUT: Duration = Duration::from_secs(2);

/// Chainlink contract observer worker.
#[derive(Parser, Debug)]
#[command(name = "contracts-monitor", version, about)]
struct Cli {
    /// JSON chain config: `{parent_id, catalog_url, evm_urls, operators}`.
    #[arg(long, env = "CONTRACTS_CONFIG")]
    config: String,
}

#[derive(Debug, Deserialize)]
struct ChainConfig {
    parent_id: String,
    catalog_url: String,
    evm_urls: Vec<String>,
    operators: Vec<OperatorEntry>,
}

#[derive(Debug, Deserialize)]
struct OperatorEntry {
    node_id: String,
    node_name: String,
    prometheus_urls: Vec<String>,
}

fn build_provider(url: &str) -> anyhow::Result<impl Provider + Clone> {
    let client = reqwest::Client::builder().timeout(RPC_TIMEOUT).build()?;
    let transport = Http::with_client(client, url.parse()?);
    Ok(ProviderBuilder::new().on_client(RpcClient::new(transport, false)))
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
    let chain: ChainConfig = serde_json::from_str(&cli.config)?;

    let mut sources = Vec::with_capacity(chain.evm_urls.len());
    for url in &chain.evm_urls {
        sources.push(EvmSource {
            url: url.clone(),
            provider: build_provider(url)?,
        });
    }
    let operators = chain
        .operators
        .into_iter()
        .map(|op| OperatorConfig {
            node_id: op.node_id,
            node_name: op.node_name,
            prometheus_urls: op.prometheus_urls,
        })
        .collect();

    let name = format!("contracts-monitor ({})", chain.parent_id);
    let observer = ContractsObserver::new(
        name,
        chain.parent_id,
        chain.catalog_url,
        sources,
        operators,
        Duration::from_secs(env.contracts_monitor_period),
    )?;

    let broker = Transport::tcp(env.broker_host.clone(), env.broker_port);
    let mut worker = MonitorWorker::new(observer, broker);
    run_with_restarts(&mut worker).await;
    info!("contracts-monitor exited");
    Ok(())
}
