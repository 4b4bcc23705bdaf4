use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::events::DomainEvent;
use crate::integrations::IntegrationSink;

const ENDPOINT: &str = "https://api2.amplitude.com/2/httpapi";

#[derive(Debug, Deserialize)]
struct Config {
    api_key: String,
}

pub struct AmplitudeSink;

#[async_trait]
impl IntegrationSink for AmplitudeSink {
    async fn send(&self, config: &str, http: &Client, event: &DomainEvent) -> anyhow::Result<()> {
        let cfg: Config = serde_json::from_str(config)?;

        let body = json!({
            "api_key": cfg.api_key,
            "events": [{
                "user_id": event.data.app_user_id,
                "event_type": event.event_type.to_string(),
                "time": event.created_at.timestamp_millis(),
                "event_properties": event.data,
            }],
        });

        let response = http.post(ENDPOINT).json(&body).send().await?;
        if !response.status().is_success() {
            anyhow::bail!("Amplitude returned {}", response.status());
        }
        Ok(())
    }
}
