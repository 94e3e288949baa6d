//! alerts-handler — dispatches alert records to the configured channels.
//!
//! Channels are enabled through the environment: the console channel by
//! the shared `ENABLE_CONSOLE_ALERTS` flag, Telegram by
//! `TELEGRAM_BOT_TOKEN`/`TELEGRAM_CHAT_ID`, webhooks by `ALERT_WEBHOOK_URL`.

use clap::Parser;
use tracing::info;

use lookout_bus::run_with_restarts;
use lookout_channels::{AlertsHandlerWorker, ChannelHandler, ConsoleChannel, TelegramChannel, WebhookChannel};
use lookout_core::{load_dotenv, Environment};

/// Alert channel dispatch worker.
#[derive(Parser, Debug)]
#[command(name = "alerts-handler", version, about)]
struct Cli {
    #[arg(long, env = "HANDLER_NAME", default_value = "alerts-handler")]
    name: String,

    /// Telegram bot token (literal or `${ENV_VAR}` reference).
    #[arg(long, env = "TELEGRAM_BOT_TOKEN")]
    telegram_bot_token: Option<String>,

    #[arg(long, env = "TELEGRAM_CHAT_ID")]
    telegram_chat_id: Option<String>,

    /// Webhook endpoint receiving the raw alert record as JSON.
    #[arg(long, env = "ALERT_WEBHOOK_URL")]
    webhook_url: Option<String>,
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

    let mut channels: Vec<Box<dyn ChannelHandler>> = Vec::new();
    if env.enable_console_alerts {
        channels.push(Box::new(ConsoleChannel::new()));
    }
    if let (Some(token), Some(chat_id)) = (cli.telegram_bot_token, cli.telegram_chat_id) {
        channels.push(Box::new(TelegramChannel::from_config(token, chat_id)?));
    }
    if let Some(url) = cli.webhook_url {
        channels.push(Box::new(WebhookChannel::new(url)?));
    }
    if channels.is_empty() {
        tracing::warn!("no channels configured; alerts will only be acked");
    }

    let mut worker = AlertsHandlerWorker::new(cli.name, &env, channels);
    run_with_restarts(&mut worker).await;
    info!("alerts-handler exited");
    Ok(())
}
