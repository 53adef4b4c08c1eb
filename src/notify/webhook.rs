use anyhow::{Context, Result};
use reqwest::Client;
use std::collections::BTreeMap;
use std::time::Duration;

use super::Notifier;
use crate::config::WebhookConfig;
use crate::error::RadarError;
use crate::event::Event;

/// POSTs `{"events": [...]}` to a fixed URL. No retries here; a failed post
/// is logged by the caller and the batch moves on.
pub struct WebhookNotifier {
    url: String,
    headers: BTreeMap<String, String>,
    client: Client,
}

impl WebhookNotifier {
    pub fn from_config(c: &WebhookConfig) -> Result<Self, RadarError> {
        if c.url.trim().is_empty() {
            return Err(RadarError::config("webhook notifier needs a url"));
        }
        let client = Client::builder()
            .timeout(Duration::from_millis(c.timeout_ms))
            .build()
            .map_err(|e| RadarError::config(format!("webhook client: {e}")))?;
        Ok(Self {
            url: c.url.clone(),
            headers: c.headers.clone(),
            client,
        })
    }
}

#[async_trait::async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn notify(&self, events: &[Event]) -> Result<()> {
        let body = serde_json::json!({ "events": events });
        let mut req = self.client.post(&self.url).json(&body);
        for (k, v) in &self.headers {
            req = req.header(k.as_str(), v.as_str());
        }
        req.send()
            .await
            .context("webhook post")?
            .error_for_status()
            .context("webhook non-2xx")?;
        Ok(())
    }
}
