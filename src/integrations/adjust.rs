use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;

use crate::events::DomainEvent;
use crate::integrations::IntegrationSink;

const ENDPOINT: &str = "https://s2s.adjust.com/event";

#[derive(Debug, Deserialize)]
struct Config {
    app_token: String,
    s2s_token: String,
    /// Adjust has no generic event name field; every trackable event needs
    /// its own dashboard-provisioned token, keyed here by the canonical
    /// event type string (e.g. "renewal", "cancellation").
    event_tokens: HashMap<String, String>,
}

pub struct AdjustSink;

#[async_trait]
impl IntegrationSink for AdjustSink {
    async fn send(&self, config: &str, http: &Client, event: &DomainEvent) -> anyhow::Result<()> {
        let cfg: Config = serde_json::from_str(config)?;
        let event_type = event.event_type.to_string();

        let Some(event_token) = cfg.event_tokens.get(&event_type) else {
            // No token provisioned for this event type means this tenant
            // doesn't track it in Adjust; not an error.
            return Ok(());
        };

        let mut params = vec![
            ("s2s", "1".to_string()),
            ("app_token", cfg.app_token.clone()),
            ("event_token", event_token.clone()),
            ("environment", if event.data.subscription.is_some() { "production" } else { "sandbox" }.to_string()),
        ];
        if let Some(transaction) = &event.data.transaction {
            if let Some(amount) = transaction.amount {
                params.push(("revenue".to_string(), format!("{:.2}", amount as f64 / 100.0)));
            }
            if let Some(currency) = &transaction.currency {
                params.push(("currency".to_string(), currency.clone()));
            }
        }

        let response = http.post(ENDPOINT).header("Authorization", format!("Bearer {}", cfg.s2s_token)).form(&params).send().await?;
        if !response.status().is_success() {
            anyhow::bail!("Adjust returned {}", response.status());
        }
        Ok(())
    }
}
