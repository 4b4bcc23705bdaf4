use async_trait::async_trait;
use axum::http::HeaderMap;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

use crate::crypto::hmac_util::{hmac_sha256_hex, verify_hmac_sha256_hex};
use crate::db::models::App;
use crate::db::models::subscription::{Platform, SubscriptionStatus};
use crate::error::{AppError, Result};
use crate::providers::types::{CanonicalState, EventType, StoreEvent};
use crate::providers::ProviderAdapter;

/// Stripe allows at most this much clock drift between the event's
/// timestamp and receipt time before the signature is rejected outright
/// (spec §8's S5 scenario).
const TIMESTAMP_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Deserialize)]
struct StripeEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    created: i64,
    data: StripeEventData,
}

#[derive(Debug, Deserialize)]
struct StripeEventData {
    object: Value,
}

#[derive(Debug, Deserialize)]
struct StripeSubscription {
    id: String,
    status: String,
    #[serde(rename = "cancel_at_period_end")]
    cancel_at_period_end: bool,
    #[serde(rename = "current_period_end")]
    current_period_end: i64,
    #[serde(rename = "current_period_start")]
    current_period_start: i64,
    items: StripeSubscriptionItems,
}

#[derive(Debug, Deserialize)]
struct StripeSubscriptionItems {
    data: Vec<StripeSubscriptionItem>,
}

#[derive(Debug, Deserialize)]
struct StripeSubscriptionItem {
    price: StripePrice,
}

#[derive(Debug, Deserialize)]
struct StripePrice {
    id: String,
    #[serde(rename = "unit_amount")]
    unit_amount: Option<i64>,
    currency: String,
}

fn parse_signature_header(header: &str) -> Option<(String, String)> {
    let parts: HashMap<&str, &str> = header
        .split(',')
        .filter_map(|part| {
            let mut split = part.splitn(2, '=');
            Some((split.next()?, split.next()?))
        })
        .collect();

    Some((parts.get("t")?.to_string(), parts.get("v1")?.to_string()))
}

/// Verifies `Stripe-Signature`: HMAC-SHA256 over `"{timestamp}.{payload}"`
/// keyed with the tenant's webhook secret, with a 5-minute tolerance on the
/// timestamp to bound replay exposure.
fn verify_stripe_signature(payload: &str, signature_header: &str, secret: &str) -> Result<()> {
    let (timestamp, expected_v1) = parse_signature_header(signature_header)
        .ok_or_else(|| AppError::SignatureInvalid("malformed Stripe-Signature header".into()))?;

    let timestamp_secs: i64 = timestamp
        .parse()
        .map_err(|_| AppError::SignatureInvalid("Stripe-Signature timestamp is not numeric".into()))?;

    let now = Utc::now().timestamp();
    if (now - timestamp_secs).abs() > TIMESTAMP_TOLERANCE_SECS {
        return Err(AppError::SignatureInvalid("Stripe-Signature timestamp outside tolerance".into()));
    }

    let signed_payload = format!("{timestamp}.{payload}");

    if !verify_hmac_sha256_hex(secret, &signed_payload, &expected_v1) {
        return Err(AppError::SignatureInvalid("Stripe-Signature does not match".into()));
    }

    Ok(())
}

fn map_event_type(event_type: &str) -> EventType {
    match event_type {
        "customer.subscription.created" => EventType::InitialPurchase,
        "customer.subscription.updated" => EventType::SubscriptionUpdated,
        "customer.subscription.deleted" => EventType::Cancellation,
        "customer.subscription.trial_will_end" => EventType::TrialEnding,
        "invoice.paid" => EventType::Renewal,
        "invoice.payment_failed" => EventType::BillingIssue,
        "charge.refunded" => EventType::Refund,
        "charge.dispute.created" => EventType::DisputeCreated,
        "charge.dispute.closed" => EventType::DisputeClosed,
        _ => EventType::Unknown,
    }
}

fn map_stripe_status(status: &str, cancel_at_period_end: bool) -> SubscriptionStatus {
    match status {
        // `cancel_at_period_end` doesn't change the status itself (spec §4.4:
        // the subscription stays active with will_renew=false until the
        // period actually elapses and Stripe sends `customer.subscription.deleted`).
        "active" | "trialing" => SubscriptionStatus::Active,
        "past_due" => SubscriptionStatus::BillingRetry,
        "unpaid" => SubscriptionStatus::GracePeriod,
        "canceled" => SubscriptionStatus::Cancelled,
        "incomplete_expired" => SubscriptionStatus::Expired,
        "paused" => SubscriptionStatus::Paused,
        _ => SubscriptionStatus::Expired,
    }
}

fn secs_to_datetime(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_else(Utc::now)
}

pub struct StripeAdapter {
    http: Client,
}

impl StripeAdapter {
    pub fn new(http: Client) -> Self {
        Self { http }
    }

    #[allow(clippy::too_many_arguments)]
    fn from_subscription_object(
        &self,
        app_id: &str,
        event_type: EventType,
        notification_uuid: String,
        created: i64,
        subscription: StripeSubscription,
        raw_body: &[u8],
    ) -> Result<StoreEvent> {
        let item = subscription
            .items
            .data
            .into_iter()
            .next()
            .ok_or_else(|| AppError::ReceiptInvalid("Stripe subscription has no items".into()))?;

        Ok(StoreEvent {
            app_id: app_id.to_string(),
            platform: Platform::Stripe,
            notification_uuid,
            event_type,
            status: map_stripe_status(&subscription.status, subscription.cancel_at_period_end),
            product_id: item.price.id,
            subscription_handle: subscription.id,
            purchase_date: secs_to_datetime(subscription.current_period_start),
            expires_date: Some(secs_to_datetime(subscription.current_period_end)),
            grace_period_expires_date: None,
            event_time: secs_to_datetime(created),
            will_renew: !subscription.cancel_at_period_end,
            is_sandbox: false,
            is_trial: false,
            revenue_amount: item.price.unit_amount,
            revenue_currency: Some(item.price.currency),
            raw_payload: raw_body.to_vec(),
        })
    }

    /// `charge.refunded` events don't embed the subscription; recovering it
    /// requires a GET against the originating invoice (spec §4.2).
    async fn subscription_id_from_invoice(&self, app: &App, invoice_id: &str) -> Result<String> {
        let cfg = app
            .stripe()
            .ok_or_else(|| AppError::ConfigurationMissing("app has no Stripe configuration".into()))?;

        let response = self
            .http
            .get(format!("https://api.stripe.com/v1/invoices/{invoice_id}"))
            .bearer_auth(&cfg.secret_key)
            .send()
            .await
            .map_err(|e| AppError::TransientUpstream(format!("Stripe invoice lookup failed: {e}")))?;

        if !response.status().is_success() {
            return Err(AppError::TransientUpstream(format!("Stripe invoice lookup returned {}", response.status())));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| AppError::TransientUpstream(format!("Stripe invoice response malformed: {e}")))?;

        body.get("subscription")
            .and_then(Value::as_str)
            .map(|s| s.to_string())
            .ok_or_else(|| AppError::ReceiptInvalid("Stripe invoice has no subscription".into()))
    }
}

#[async_trait]
impl ProviderAdapter for StripeAdapter {
    async fn verify_receipt(&self, app: &App, handle: &str) -> Result<CanonicalState> {
        let cfg = app
            .stripe()
            .ok_or_else(|| AppError::ConfigurationMissing("app has no Stripe configuration".into()))?;

        let response = self
            .http
            .get(format!("https://api.stripe.com/v1/subscriptions/{handle}"))
            .bearer_auth(&cfg.secret_key)
            .send()
            .await
            .map_err(|e| AppError::TransientUpstream(format!("Stripe subscription lookup failed: {e}")))?;

        if !response.status().is_success() {
            return Err(AppError::TransientUpstream(format!("Stripe subscription lookup returned {}", response.status())));
        }

        let subscription: StripeSubscription = response
            .json()
            .await
            .map_err(|e| AppError::TransientUpstream(format!("Stripe subscription response malformed: {e}")))?;

        let item = subscription
            .items
            .data
            .into_iter()
            .next()
            .ok_or_else(|| AppError::ReceiptInvalid("Stripe subscription has no items".into()))?;

        Ok(CanonicalState {
            platform: Platform::Stripe,
            status: map_stripe_status(&subscription.status, subscription.cancel_at_period_end),
            product_id: item.price.id,
            subscription_handle: subscription.id,
            purchase_date: secs_to_datetime(subscription.current_period_start),
            expires_date: Some(secs_to_datetime(subscription.current_period_end)),
            grace_period_expires_date: None,
            will_renew: !subscription.cancel_at_period_end,
            is_sandbox: false,
            is_trial: false,
            revenue_amount: item.price.unit_amount,
            revenue_currency: Some(item.price.currency),
        })
    }

    async fn verify_notification(&self, app: &App, raw_body: &[u8], headers: &HeaderMap) -> Result<StoreEvent> {
        let cfg = app
            .stripe()
            .ok_or_else(|| AppError::ConfigurationMissing("app has no Stripe configuration".into()))?;

        let signature_header = headers
            .get("stripe-signature")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::SignatureInvalid("missing Stripe-Signature header".into()))?;

        let payload = std::str::from_utf8(raw_body)
            .map_err(|_| AppError::SignatureInvalid("Stripe payload is not valid UTF-8".into()))?;

        verify_stripe_signature(payload, signature_header, &cfg.webhook_secret)?;

        let event: StripeEvent =
            serde_json::from_str(payload).map_err(|e| AppError::ReceiptInvalid(format!("malformed Stripe event: {e}")))?;

        let event_type = map_event_type(&event.event_type);

        if event.event_type == "charge.refunded" {
            let charge = event.data.object;
            let invoice_id = charge
                .get("invoice")
                .and_then(Value::as_str)
                .ok_or_else(|| AppError::ReceiptInvalid("Stripe charge.refunded missing invoice".into()))?;
            let subscription_id = self.subscription_id_from_invoice(app, invoice_id).await?;

            let response = self
                .http
                .get(format!("https://api.stripe.com/v1/subscriptions/{subscription_id}"))
                .bearer_auth(&cfg.secret_key)
                .send()
                .await
                .map_err(|e| AppError::TransientUpstream(format!("Stripe subscription lookup failed: {e}")))?;
            let subscription: StripeSubscription = response
                .json()
                .await
                .map_err(|e| AppError::TransientUpstream(format!("Stripe subscription response malformed: {e}")))?;

            let mut store_event =
                self.from_subscription_object(&app.id, event_type, event.id, event.created, subscription, raw_body)?;
            store_event.status = SubscriptionStatus::Cancelled;
            let amount = charge.get("amount_refunded").and_then(Value::as_i64);
            store_event.revenue_amount = amount.map(|a| -a);
            return Ok(store_event);
        }

        let subscription: StripeSubscription = serde_json::from_value(event.data.object)
            .map_err(|e| AppError::ReceiptInvalid(format!("Stripe event missing subscription object: {e}")))?;

        self.from_subscription_object(&app.id, event_type, event.id, event.created, subscription, raw_body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_stale_timestamp() {
        let secret = "whsec_test";
        let payload = "{}";
        let stale_ts = (Utc::now().timestamp() - 1000).to_string();
        let signed_payload = format!("{stale_ts}.{payload}");
        let sig = hmac_sha256_hex(secret, &signed_payload);
        let header = format!("t={stale_ts},v1={sig}");
        let result = verify_stripe_signature(payload, &header, secret);
        assert!(result.is_err());
    }

    #[test]
    fn accepts_fresh_valid_signature() {
        let secret = "whsec_test";
        let payload = r#"{"id":"evt_1"}"#;
        let ts = Utc::now().timestamp().to_string();
        let signed_payload = format!("{ts}.{payload}");
        let sig = hmac_sha256_hex(secret, &signed_payload);
        let header = format!("t={ts},v1={sig}");
        assert!(verify_stripe_signature(payload, &header, secret).is_ok());
    }

    #[test]
    fn crafted_short_signature_is_rejected_not_panicked() {
        let secret = "whsec_test";
        let payload = "{}";
        let ts = Utc::now().timestamp().to_string();
        let header = format!("t={ts},v1=deadbeef");
        let result = verify_stripe_signature(payload, &header, secret);
        assert!(result.is_err());
    }

    #[test]
    fn maps_known_event_types() {
        assert_eq!(map_event_type("customer.subscription.deleted"), EventType::Cancellation);
        assert_eq!(map_event_type("invoice.paid"), EventType::Renewal);
        assert_eq!(map_event_type("something.unrecognized"), EventType::Unknown);
    }
}
