use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::crypto::hmac_util::hmac_sha256_hex;
use crate::events::DomainEvent;
use crate::integrations::IntegrationSink;

#[derive(Debug, Deserialize)]
struct Config {
    url: String,
    #[serde(default)]
    secret: Option<String>,
}

pub struct GenericSink;

#[async_trait]
impl IntegrationSink for GenericSink {
    async fn send(&self, config: &str, http: &Client, event: &DomainEvent) -> anyhow::Result<()> {
        let cfg: Config = serde_json::from_str(config)?;
        let payload = serde_json::to_string(event)?;

        let mut request = http.post(&cfg.url).header("Content-Type", "application/json");
        if let Some(secret) = &cfg.secret {
            let signature = hmac_sha256_hex(secret, &payload);
            request = request.header("X-MRRCat-Signature", signature);
        }

        let response = request.body(payload).send().await?;
        if !response.status().is_success() {
            anyhow::bail!("generic webhook returned {}", response.status());
        }
        Ok(())
    }
}
