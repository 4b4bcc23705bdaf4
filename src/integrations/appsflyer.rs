use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::events::DomainEvent;
use crate::integrations::IntegrationSink;

#[derive(Debug, Deserialize)]
struct Config {
    dev_key: String,
    app_id: String,
}

pub struct AppsFlyerSink;

#[async_trait]
impl IntegrationSink for AppsFlyerSink {
    async fn send(&self, config: &str, http: &Client, event: &DomainEvent) -> anyhow::Result<()> {
        let cfg: Config = serde_json::from_str(config)?;
        let url = format!("https://api2.appsflyer.com/inappevent/{}", cfg.app_id);

        let body = json!({
            "customer_user_id": event.data.app_user_id,
            "eventName": event.event_type.to_string(),
            "eventValue": event.data.transaction.as_ref().map(|t| json!({
                "af_revenue": t.amount,
                "af_currency": t.currency,
            })),
        });

        let response = http.post(&url).header("authentication", &cfg.dev_key).json(&body).send().await?;
        if !response.status().is_success() {
            anyhow::bail!("AppsFlyer returned {}", response.status());
        }
        Ok(())
    }
}
