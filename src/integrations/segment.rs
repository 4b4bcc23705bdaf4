use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::events::DomainEvent;
use crate::integrations::IntegrationSink;

const ENDPOINT: &str = "https://api.segment.io/v1/track";

#[derive(Debug, Deserialize)]
struct Config {
    write_key: String,
}

pub struct SegmentSink;

#[async_trait]
impl IntegrationSink for SegmentSink {
    async fn send(&self, config: &str, http: &Client, event: &DomainEvent) -> anyhow::Result<()> {
        let cfg: Config = serde_json::from_str(config)?;

        let body = json!({
            "userId": event.data.app_user_id,
            "event": event.event_type.to_string(),
            "properties": event.data,
            "timestamp": event.created_at,
        });

        // Segment's HTTP API authenticates with the write key as the basic
        // auth username and an empty password.
        let response = http.post(ENDPOINT).basic_auth(&cfg.write_key, Some("")).json(&body).send().await?;
        if !response.status().is_success() {
            anyhow::bail!("Segment returned {}", response.status());
        }
        Ok(())
    }
}
