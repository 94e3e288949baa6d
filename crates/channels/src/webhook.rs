//! Generic webhook channel: POSTs the alert record as JSON.

use lookout_core::Alert;

use crate::traits::{ChannelError, ChannelHandler};

#[derive(Debug)]
pub struct WebhookChannel {
    url: String,
    client: reqwest::Client,
}

impl WebhookChannel {
    pub fn new(url: impl Into<String>) -> Result<Self, ChannelError> {
        let url = url.into();
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ChannelError::Config(format!("invalid webhook url: {url}")));
        }
        Ok(Self {
            url,
            client: reqwest::Client::new(),
        })
    }
}

#[async_trait::async_trait]
impl ChannelHandler for WebhookChannel {
    async fn send(&self, alert: &Alert) -> Result<(), ChannelError> {
        let response = self.client.post(&self.url).json(alert).send().await?;
        if !response.status().is_success() {
            return Err(ChannelError::Api(format!(
                "webhook returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    fn channel_name(&self) -> &str {
        "webhook"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_http_urls() {
        assert!(WebhookChannel::new("ftp://example.com/hook").is_err());
        assert!(WebhookChannel::new("https://example.com/hook").is_ok());
    }
}
