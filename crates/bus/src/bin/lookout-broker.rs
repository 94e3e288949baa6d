//! lookout-broker — the central message broker.
//!
//! Binds the ROUTER frontend all pipeline workers connect to. Queues,
//! bindings and in-flight deliveries live here; entity state durability is
//! the store's job, not the broker's.

use clap::Parser;
use tracing::info;

use lookout_bus::{shutdown_signal, BrokerConfig, BusBroker, Transport};

/// Central message broker for the lookout pipeline.
#[derive(Parser, Debug)]
#[command(name = "lookout-broker", version, about)]
struct Cli {
    /// Transport kind: "ipc" or "tcp".
    #[arg(long, env = "BROKER_TRANSPORT", default_value = "tcp")]
    transport: String,

    /// Host to bind when using TCP.
    #[arg(long, env = "BROKER_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to bind when using TCP.
    #[arg(long, env = "BROKER_PORT", default_value_t = 5672)]
    port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = match cli.transport.as_str() {
        "ipc" => BrokerConfig::local(),
        _ => BrokerConfig {
            frontend: Transport::tcp(&cli.host, cli.port),
        },
    };

    let broker = BusBroker::new(config);
    let shutdown = broker.shutdown_handle();

    tokio::spawn(async move {
        shutdown_signal().await;
        info!("termination signal received, stopping broker");
        shutdown.store(true, std::sync::atomic::Ordering::SeqCst);
    });

    broker.run().await?;
    info!("lookout-broker exited");
    Ok(())
}
