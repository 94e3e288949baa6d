//! Telegram Bot API channel.
//!
//! Delivers alert records via the `sendMessage` endpoint with rate limit
//! handling. Tokens may be given literally or as `${ENV_VAR}` references.

use lookout_core::Alert;

use crate::traits::{resolve_secret, ChannelError, ChannelHandler};

/// Sends alerts via the Telegram Bot API.
#[derive(Debug)]
pub struct TelegramChannel {
    bot_token: String,
    chat_id: String,
    client: reqwest::Client,
}

impl TelegramChannel {
    pub fn from_config(bot_token: String, chat_id: String) -> Result<Self, ChannelError> {
        let bot_token = resolve_secret(&bot_token)?;
        if bot_token.is_empty() {
            return Err(ChannelError::Config(
                "Telegram bot token must not be empty".to_string(),
            ));
        }
        Ok(Self {
            bot_token,
            chat_id,
            client: reqwest::Client::new(),
        })
    }
}

fn severity_emoji(alert: &Alert) -> &'static str {
    match alert.severity {
        lookout_core::Severity::Critical => "🔴",
        lookout_core::Severity::Error => "🟠",
        lookout_core::Severity::Warning => "🟡",
        lookout_core::Severity::Info => "🟢",
    }
}

#[async_trait::async_trait]
impl ChannelHandler for TelegramChannel {
    async fn send(&self, alert: &Alert) -> Result<(), ChannelError> {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);
        let text = format!(
            "{} *{}*\n{}\nchain: {} | origin: {}",
            severity_emoji(alert),
            alert.severity,
            alert.message,
            alert.parent_id,
            alert.origin_id
        );
        let body = serde_json::json!({
            "chat_id": self.chat_id,
            "text": text,
            "parse_mode": "Markdown",
        });

        tracing::debug!(chat_id = %self.chat_id, "sending Telegram alert");
        let response = self.client.post(&url).json(&body).send().await?;
        let status = response.status();
        let resp_body: serde_json::Value = response.json().await?;

        if resp_body.get("ok") == Some(&serde_json::Value::Bool(true)) {
            return Ok(());
        }

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = resp_body
                .get("parameters")
                .and_then(|p| p.get("retry_after"))
                .and_then(|v| v.as_u64())
                .unwrap_or(30);
            return Err(ChannelError::RateLimited {
                retry_after_secs: retry_after,
            });
        }

        let description = resp_body
            .get("description")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown Telegram API error");
        Err(ChannelError::Api(description.to_string()))
    }

    fn channel_name(&self) -> &str {
        "telegram"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_var_token_resolution() {
        std::env::set_var("TEST_TG_BOT_TOKEN", "123:ABC");
        let channel =
            TelegramChannel::from_config("${TEST_TG_BOT_TOKEN}".to_string(), "12345".to_string())
                .expect("should resolve env var");
        assert_eq!(channel.bot_token, "123:ABC");
        assert_eq!(channel.chat_id, "12345");
        std::env::remove_var("TEST_TG_BOT_TOKEN");
    }

    #[test]
    fn empty_token_rejected() {
        let result = TelegramChannel::from_config(String::new(), "12345".to_string());
        assert!(result.is_err());
    }

    #[test]
    fn literal_token_accepted() {
        let channel =
            TelegramChannel::from_config("123456:ABC-DEF".to_string(), "-100123".to_string())
                .unwrap();
        assert_eq!(channel.channel_name(), "telegram");
    }
}
