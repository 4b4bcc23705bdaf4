pub mod adjust;
pub mod amplitude;
pub mod appsflyer;
pub mod braze;
pub mod generic;
pub mod mixpanel;
pub mod segment;
pub mod slack;

use async_trait::async_trait;
use futures::future::join_all;
use reqwest::Client;
use sqlx::sqlite::SqlitePool;

use crate::db::models::integration::{Integration, IntegrationDelivery, IntegrationType};
use crate::events::DomainEvent;

/// One analytics/marketing fan-out sink (spec §4.7). Each implementation
/// owns its own wire shape; the orchestrator only needs a uniform send.
#[async_trait]
pub trait IntegrationSink {
    async fn send(&self, config: &str, http: &Client, event: &DomainEvent) -> anyhow::Result<()>;
}

fn sink_for(kind: IntegrationType) -> Box<dyn IntegrationSink + Send + Sync> {
    match kind {
        IntegrationType::Amplitude => Box::new(amplitude::AmplitudeSink),
        IntegrationType::Mixpanel => Box::new(mixpanel::MixpanelSink),
        IntegrationType::Segment => Box::new(segment::SegmentSink),
        IntegrationType::Braze => Box::new(braze::BrazeSink),
        IntegrationType::AppsFlyer => Box::new(appsflyer::AppsFlyerSink),
        IntegrationType::Adjust => Box::new(adjust::AdjustSink),
        IntegrationType::Slack => Box::new(slack::SlackSink),
        IntegrationType::Generic => Box::new(generic::GenericSink),
    }
}

/// Fans a `DomainEvent` out to every enabled integration configured for the
/// app whose filter matches the event type (spec §4.7). Every send runs
/// concurrently; a failing sink is logged and recorded in
/// `integration_deliveries`, never retried, never blocks the others.
pub async fn fan_out(app_id: &str, event: &DomainEvent, http: &Client, pool: &SqlitePool) -> anyhow::Result<()> {
    let integrations = Integration::list_enabled_for_app(app_id, pool).await?;
    let event_type = event.event_type.to_string();

    let sends = integrations.into_iter().filter(|i| i.accepts(&event_type)).map(|integration| {
        let http = http.clone();
        let event_type = event_type.clone();
        let pool = pool.clone();
        async move {
            let Some(kind) = integration.kind() else {
                tracing::warn!(integration_id = %integration.id, kind = %integration.integration_type, "unknown integration type, skipping");
                return;
            };
            let sink = sink_for(kind);
            let result = sink.send(&integration.config, &http, event).await;

            let (success, error_message) = match &result {
                Ok(()) => (true, None),
                Err(e) => {
                    tracing::warn!(integration_id = %integration.id, kind = %kind, error = %e, "integration delivery failed");
                    (false, Some(e.to_string()))
                }
            };

            let delivery = IntegrationDelivery::new(integration.id.clone(), event_type, success, error_message);
            if let Err(e) = delivery.create(&pool).await {
                tracing::error!(integration_id = %integration.id, error = %e, "failed to record integration delivery");
            }
        }
    });

    join_all(sends).await;
    Ok(())
}
