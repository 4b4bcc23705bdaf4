use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::events::DomainEvent;
use crate::integrations::IntegrationSink;

const ENDPOINT: &str = "https://api.mixpanel.com/track";

#[derive(Debug, Deserialize)]
struct Config {
    project_token: String,
}

pub struct MixpanelSink;

#[async_trait]
impl IntegrationSink for MixpanelSink {
    async fn send(&self, config: &str, http: &Client, event: &DomainEvent) -> anyhow::Result<()> {
        let cfg: Config = serde_json::from_str(config)?;

        let payload = json!({
            "event": event.event_type.to_string(),
            "properties": {
                "token": cfg.project_token,
                "distinct_id": event.data.app_user_id,
                "time": event.created_at.timestamp(),
                "subscriber_id": event.data.subscriber_id,
                "subscription": event.data.subscription,
                "transaction": event.data.transaction,
            },
        });

        let encoded = STANDARD.encode(serde_json::to_vec(&payload)?);
        let response = http.get(ENDPOINT).query(&[("data", encoded)]).send().await?;
        if !response.status().is_success() {
            anyhow::bail!("Mixpanel returned {}", response.status());
        }
        Ok(())
    }
}
