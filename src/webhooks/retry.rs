use reqwest::Client;
use sqlx::sqlite::SqlitePool;
use std::time::Duration;

use crate::db::models::webhook::Webhook;
use crate::db::models::webhook_delivery::WebhookDelivery;

/// Background task retrying due webhook deliveries (spec §4.6). Runs
/// forever on a fixed interval; each sweep pulls up to `batch_size`
/// deliveries whose `next_retry_at` has passed and retries them one at a
/// time against `dispatcher::attempt_delivery`.
pub async fn run(http: Client, pool: SqlitePool, interval_secs: u64, batch_size: i64) {
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
    loop {
        ticker.tick().await;
        if let Err(e) = sweep_once(&http, &pool, batch_size).await {
            tracing::error!(error = %e, "webhook retry sweep failed");
        }
    }
}

async fn sweep_once(http: &Client, pool: &SqlitePool, batch_size: i64) -> anyhow::Result<()> {
    let due = WebhookDelivery::due_for_retry(batch_size, pool).await?;
    if due.is_empty() {
        return Ok(());
    }
    tracing::info!(count = due.len(), "retrying due webhook deliveries");

    for mut delivery in due {
        let webhook = match Webhook::find_by_id(&delivery.webhook_id, pool).await? {
            Some(w) => w,
            None => continue,
        };
        if let Err(e) = super::dispatcher::attempt_delivery(&webhook, &mut delivery, http, pool).await {
            tracing::error!(delivery_id = %delivery.id, error = %e, "retry attempt errored");
        }
    }

    Ok(())
}
