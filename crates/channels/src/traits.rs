//! Channel handler trait and shared error types.

use lookout_core::Alert;

/// Errors that can occur during alert delivery.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("rate limited: retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("channel API error: {0}")]
    Api(String),
}

/// A delivery channel for alert records.
#[async_trait::async_trait]
pub trait ChannelHandler: Send + Sync {
    /// Deliver one alert through this channel.
    async fn send(&self, alert: &Alert) -> Result<(), ChannelError>;

    /// Human-readable name for this channel (e.g. "telegram").
    fn channel_name(&self) -> &str;

    /// Test connectivity with a sample alert.
    async fn test(&self) -> Result<(), ChannelError> {
        let alert = Alert::component_reset("channel-test", "test", 0.0);
        self.send(&alert).await
    }
}

/// Resolve a `${VAR}` reference against the environment, passing literal
/// values through.
pub fn resolve_secret(raw: &str) -> Result<String, ChannelError> {
    if let Some(inner) = raw.strip_prefix("${") {
        let var_name = inner
            .strip_suffix('}')
            .ok_or_else(|| ChannelError::Config(format!("malformed env var reference: {raw}")))?;
        std::env::var(var_name)
            .map_err(|_| ChannelError::Config(format!("environment variable '{var_name}' is not set")))
    } else {
        Ok(raw.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_env_references_and_literals() {
        std::env::set_var("TEST_CHANNEL_SECRET", "tok-123");
        assert_eq!(resolve_secret("${TEST_CHANNEL_SECRET}").unwrap(), "tok-123");
        assert_eq!(resolve_secret("literal-token").unwrap(), "literal-token");
        assert!(resolve_secret("${MISSING_CHANNEL_SECRET_XYZ}").is_err());
        assert!(resolve_secret("${unterminated").is_err());
        std::env::remove_var("TEST_CHANNEL_SECRET");
    }
}
