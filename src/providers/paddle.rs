use async_trait::async_trait;
use axum::http::HeaderMap;
use chrono::{NaiveDateTime, Utc};
use reqwest::Client;
use std::collections::BTreeMap;

use crate::crypto::php_serialize::verify_paddle_signature;
use crate::db::models::App;
use crate::db::models::subscription::{Platform, SubscriptionStatus};
use crate::error::{AppError, Result};
use crate::providers::types::{CanonicalState, EventType, StoreEvent};
use crate::providers::ProviderAdapter;

fn map_alert_name(alert_name: &str) -> EventType {
    match alert_name {
        "subscription_created" => EventType::InitialPurchase,
        "subscription_payment_succeeded" => EventType::Renewal,
        "subscription_updated" => EventType::SubscriptionUpdated,
        "subscription_cancelled" => EventType::Cancellation,
        "subscription_payment_failed" => EventType::BillingIssue,
        "subscription_payment_refunded" => EventType::Refund,
        _ => EventType::Unknown,
    }
}

fn map_alert_status(status: &str) -> SubscriptionStatus {
    match status {
        "active" | "trialing" => SubscriptionStatus::Active,
        "past_due" => SubscriptionStatus::BillingRetry,
        "paused" => SubscriptionStatus::Paused,
        "deleted" | "cancelled" => SubscriptionStatus::Cancelled,
        _ => SubscriptionStatus::Expired,
    }
}

/// Paddle's classic alerts send `YYYY-MM-DD HH:MM:SS`, naive and always UTC.
fn parse_paddle_datetime(s: &str) -> Option<chrono::DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

pub struct PaddleAdapter {
    #[allow(dead_code)]
    http: Client,
}

impl PaddleAdapter {
    pub fn new(http: Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl ProviderAdapter for PaddleAdapter {
    /// Paddle's classic API has no single "fetch subscription by id" receipt
    /// endpoint equivalent to Apple/Google's; subscription state arrives
    /// exclusively through alerts, so direct client-submitted verification
    /// isn't supported for this provider (spec §4.2 notes this is
    /// provider-dependent).
    async fn verify_receipt(&self, _app: &App, _handle: &str) -> Result<CanonicalState> {
        Err(AppError::BadRequest(
            "Paddle does not support client-submitted receipt verification; use webhook alerts".into(),
        ))
    }

    async fn verify_notification(&self, app: &App, raw_body: &[u8], _headers: &HeaderMap) -> Result<StoreEvent> {
        let cfg = app
            .paddle()
            .ok_or_else(|| AppError::ConfigurationMissing("app has no Paddle configuration".into()))?;

        let body_str = std::str::from_utf8(raw_body)
            .map_err(|_| AppError::ReceiptInvalid("Paddle payload is not valid UTF-8".into()))?;

        let all_fields: BTreeMap<String, String> = serde_urlencoded::from_str(body_str)
            .map_err(|e| AppError::ReceiptInvalid(format!("malformed Paddle form body: {e}")))?;

        let mut fields = all_fields.clone();
        let signature = fields
            .remove("p_signature")
            .ok_or_else(|| AppError::SignatureInvalid("Paddle payload missing p_signature".into()))?;

        verify_paddle_signature(&fields, &signature, &cfg.public_key_pem)
            .map_err(|e| AppError::SignatureInvalid(format!("Paddle signature verification failed: {e}")))?;

        let alert_name = fields
            .get("alert_name")
            .ok_or_else(|| AppError::ReceiptInvalid("Paddle payload missing alert_name".into()))?
            .clone();
        let alert_id = fields
            .get("alert_id")
            .ok_or_else(|| AppError::ReceiptInvalid("Paddle payload missing alert_id".into()))?
            .clone();
        let subscription_id = fields
            .get("subscription_id")
            .ok_or_else(|| AppError::ReceiptInvalid("Paddle payload missing subscription_id".into()))?
            .clone();
        let product_id = fields.get("subscription_plan_id").cloned().unwrap_or_default();
        let status = fields.get("status").map(|s| map_alert_status(s)).unwrap_or(SubscriptionStatus::Active);

        let event_type = map_alert_name(&alert_name);

        let event_time = fields
            .get("event_time")
            .and_then(|s| parse_paddle_datetime(s))
            .unwrap_or_else(Utc::now);
        let purchase_date = event_time;
        let expires_date = fields.get("next_bill_date").and_then(|s| parse_paddle_datetime(&format!("{s} 00:00:00")));

        let revenue_amount = fields
            .get("sale_gross")
            .or_else(|| fields.get("amount"))
            .and_then(|s| s.parse::<f64>().ok())
            .map(|amount| (amount * 100.0).round() as i64);
        let revenue_amount = if alert_name == "subscription_payment_refunded" {
            revenue_amount.map(|a| -a)
        } else {
            revenue_amount
        };
        let revenue_currency = fields.get("currency").cloned();

        let status = if event_type == EventType::Refund {
            SubscriptionStatus::Cancelled
        } else {
            status
        };

        let will_renew = !matches!(event_type, EventType::Cancellation | EventType::Refund);

        Ok(StoreEvent {
            app_id: app.id.clone(),
            platform: Platform::Paddle,
            notification_uuid: alert_id,
            event_type,
            status,
            product_id,
            subscription_handle: subscription_id,
            purchase_date,
            expires_date,
            grace_period_expires_date: None,
            event_time,
            will_renew,
            is_sandbox: cfg.sandbox,
            is_trial: false,
            revenue_amount,
            revenue_currency,
            raw_payload: raw_body.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_alert_names() {
        assert_eq!(map_alert_name("subscription_created"), EventType::InitialPurchase);
        assert_eq!(map_alert_name("subscription_payment_refunded"), EventType::Refund);
        assert_eq!(map_alert_name("something_else"), EventType::Unknown);
    }

    #[test]
    fn parses_paddle_datetime() {
        let dt = parse_paddle_datetime("2024-03-01 12:30:00").unwrap();
        assert_eq!(dt.timestamp(), 1709296200);
    }
}
