//! HTTP webhook notifier.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::redirect::Policy;

use chainscraper_core::config::NotificationConfig;
use chainscraper_core::error::{Result, ScraperError};
use chainscraper_core::notify::{EventPayload, Notifier};

/// POSTs every event as JSON to a fixed URL.
///
/// Any 2xx or 3xx answer counts as delivered; redirects are not followed.
pub struct WebhookNotifier {
    http: reqwest::Client,
    url: String,
    token: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .redirect(Policy::none())
            .build()
            .map_err(|e| ScraperError::Config(format!("failed to build http client: {e}")))?;
        Ok(Self { http, url: url.into(), token: token.into() })
    }

    /// `None` when delivery is switched off.
    pub fn from_config(config: &NotificationConfig) -> Result<Option<Self>> {
        if !config.send {
            return Ok(None);
        }
        let url = config
            .url
            .as_deref()
            .ok_or_else(|| ScraperError::Config("notification.url is required when send is enabled".into()))?;
        Self::new(url, config.token.clone()).map(Some)
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, payload: &EventPayload) -> Result<()> {
        let resp = self
            .http
            .post(&self.url)
            .header(AUTHORIZATION, format!("Token {}", self.token))
            .json(payload)
            .send()
            .await
            .map_err(|e| ScraperError::Notification(e.to_string()))?;

        let status = resp.status();
        if status.is_success() || status.is_redirection() {
            tracing::debug!(event_type = %payload.event_type, status = status.as_u16(), "event delivered");
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        Err(ScraperError::Notification(format!("HTTP {}: {body}", status.as_u16())))
    }
}
