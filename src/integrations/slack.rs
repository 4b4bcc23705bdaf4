use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::events::DomainEvent;
use crate::integrations::IntegrationSink;

#[derive(Debug, Deserialize)]
struct Config {
    webhook_url: String,
}

pub struct SlackSink;

#[async_trait]
impl IntegrationSink for SlackSink {
    async fn send(&self, config: &str, http: &Client, event: &DomainEvent) -> anyhow::Result<()> {
        let cfg: Config = serde_json::from_str(config)?;

        let text = format!(
            "*{}* for subscriber `{}`{}",
            event.event_type,
            event.data.app_user_id,
            event
                .data
                .subscription
                .as_ref()
                .map(|s| format!(" — {} on {}", s.product_id, s.platform))
                .unwrap_or_default(),
        );

        let response = http.post(&cfg.webhook_url).json(&json!({ "text": text })).send().await?;
        if !response.status().is_success() {
            anyhow::bail!("Slack webhook returned {}", response.status());
        }
        Ok(())
    }
}
