use chrono::Utc;
use reqwest::Client;
use sqlx::sqlite::SqlitePool;
use std::time::Duration;

use crate::crypto::hmac_util::hmac_sha256_hex;
use crate::db::models::webhook::Webhook;
use crate::db::models::webhook_delivery::WebhookDelivery;
use crate::events::DomainEvent;

const USER_AGENT: &str = "PayCat-Webhook/1.0";
const DELIVERY_TIMEOUT_SECS: u64 = 30;
const MAX_RESPONSE_BODY_BYTES: usize = 1000;

/// Dispatches a canonical event to every active webhook the app has
/// registered whose filter accepts this event type (spec §4.6). Each
/// webhook gets its own `WebhookDelivery` row and its own delivery attempt;
/// a failure on one webhook never affects another.
pub async fn dispatch(app_id: &str, event: &DomainEvent, http: &Client, pool: &SqlitePool) -> anyhow::Result<()> {
    let webhooks = Webhook::list_active_for_app(app_id, pool).await?;
    let event_type = event.event_type.to_string();
    let payload = serde_json::to_string(event)?;

    for webhook in webhooks {
        if !webhook.accepts(&event_type) {
            continue;
        }

        let mut delivery = WebhookDelivery::new(webhook.id.clone(), event_type.clone(), payload.clone());
        delivery.create(pool).await?;

        attempt_delivery(&webhook, &mut delivery, http, pool).await?;
    }

    Ok(())
}

/// Performs a single delivery attempt and records the outcome. Called both
/// synchronously right after an event is produced and from the retry sweep
/// (spec §4.6) — the two paths share this function so the signing and
/// bookkeeping logic can't drift apart.
pub async fn attempt_delivery(
    webhook: &Webhook,
    delivery: &mut WebhookDelivery,
    http: &Client,
    pool: &SqlitePool,
) -> anyhow::Result<()> {
    let timestamp = Utc::now().timestamp();
    let signing_input = format!("{timestamp}.{}", delivery.payload);
    let signature = hmac_sha256_hex(&webhook.secret, &signing_input);

    let result = http
        .post(&webhook.url)
        .timeout(Duration::from_secs(DELIVERY_TIMEOUT_SECS))
        .header("Content-Type", "application/json")
        .header("X-PayCat-Signature", format!("t={timestamp},v1={signature}"))
        .header("X-PayCat-Delivery-ID", &delivery.id)
        .header("User-Agent", USER_AGENT)
        .body(delivery.payload.clone())
        .send()
        .await;

    match result {
        Ok(response) => {
            let status = response.status().as_u16() as i64;
            let body = response.text().await.unwrap_or_default();
            let truncated: String = body.chars().take(MAX_RESPONSE_BODY_BYTES).collect();

            if (200..300).contains(&status) {
                delivery.mark_delivered(status, &truncated, pool).await?;
                tracing::info!(delivery_id = %delivery.id, webhook_id = %webhook.id, status, "webhook delivered");
            } else {
                delivery.mark_failed(Some(status), Some(&truncated), pool).await?;
                tracing::warn!(delivery_id = %delivery.id, webhook_id = %webhook.id, status, "webhook delivery failed, scheduled for retry");
            }
        }
        Err(e) => {
            delivery.mark_failed(None, Some(&e.to_string()), pool).await?;
            tracing::warn!(delivery_id = %delivery.id, webhook_id = %webhook.id, error = %e, "webhook delivery errored, scheduled for retry");
        }
    }

    Ok(())
}
