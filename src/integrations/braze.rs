use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::events::DomainEvent;
use crate::integrations::IntegrationSink;

#[derive(Debug, Deserialize)]
struct Config {
    api_key: String,
    /// Braze instances are sharded per-customer; there is no single
    /// `rest.braze.com`, so the REST endpoint is part of the tenant's config.
    rest_endpoint: String,
}

pub struct BrazeSink;

#[async_trait]
impl IntegrationSink for BrazeSink {
    async fn send(&self, config: &str, http: &Client, event: &DomainEvent) -> anyhow::Result<()> {
        let cfg: Config = serde_json::from_str(config)?;
        let url = format!("{}/users/track", cfg.rest_endpoint.trim_end_matches('/'));

        let body = json!({
            "events": [{
                "external_id": event.data.app_user_id,
                "name": event.event_type.to_string(),
                "time": event.created_at.to_rfc3339(),
                "properties": event.data,
            }],
        });

        let response = http.post(&url).bearer_auth(&cfg.api_key).json(&body).send().await?;
        if !response.status().is_success() {
            anyhow::bail!("Braze returned {}", response.status());
        }
        Ok(())
    }
}
