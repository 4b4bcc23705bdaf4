use async_trait::async_trait;
use axum::http::HeaderMap;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;

use crate::crypto::sns::{signing_cert_host_is_trusted, verify_sns_signature, SnsEnvelope};
use crate::db::models::App;
use crate::db::models::subscription::{Platform, SubscriptionStatus};
use crate::error::{AppError, Result};
use crate::providers::types::{CanonicalState, EventType, StoreEvent};
use crate::providers::ProviderAdapter;

#[derive(Debug, Deserialize)]
struct SnsNotification {
    #[serde(rename = "Type")]
    message_type: String,
    #[serde(rename = "MessageId")]
    message_id: String,
    #[serde(rename = "Subject")]
    subject: Option<String>,
    #[serde(rename = "Message")]
    message: String,
    #[serde(rename = "Timestamp")]
    timestamp: String,
    #[serde(rename = "TopicArn")]
    topic_arn: String,
    #[serde(rename = "SigningCertURL")]
    signing_cert_url: String,
    #[serde(rename = "Signature")]
    signature: String,
    #[serde(rename = "SubscribeURL")]
    subscribe_url: Option<String>,
}

/// The RTN body carried inside the SNS `Message` field (Amazon Appstore
/// Subscription Status Notifications).
#[derive(Debug, Deserialize)]
struct AmazonRtn {
    #[serde(rename = "notificationType")]
    notification_type: String,
    #[serde(rename = "receiptId")]
    receipt_id: String,
    #[serde(rename = "amazonUserId")]
    amazon_user_id: String,
}

#[derive(Debug, Deserialize)]
struct AmazonReceiptResponse {
    #[serde(rename = "productType")]
    #[allow(dead_code)]
    product_type: Option<String>,
    sku: String,
    #[serde(rename = "purchaseDate")]
    purchase_date: i64,
    #[serde(rename = "renewalDate")]
    renewal_date: Option<i64>,
    #[serde(rename = "cancelDate")]
    cancel_date: Option<i64>,
    #[serde(rename = "autoRenewing")]
    auto_renewing: Option<bool>,
    #[serde(rename = "freeTrialEndDate")]
    #[allow(dead_code)]
    free_trial_end_date: Option<i64>,
}

fn map_notification_type(notification_type: &str) -> EventType {
    match notification_type {
        "SUBSCRIPTION_PURCHASED" => EventType::InitialPurchase,
        "SUBSCRIPTION_RENEWED" => EventType::Renewal,
        "SUBSCRIPTION_CANCELLED" => EventType::Cancellation,
        "SUBSCRIPTION_EXPIRED" => EventType::Expiration,
        _ => EventType::Unknown,
    }
}

fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis).single().unwrap_or_else(Utc::now)
}

fn parse_rfc3339(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.with_timezone(&Utc))
}

pub struct AmazonAdapter {
    http: Client,
}

impl AmazonAdapter {
    pub fn new(http: Client) -> Self {
        Self { http }
    }

    fn base_url(is_sandbox: bool) -> &'static str {
        if is_sandbox {
            "https://appstore-sdk.amazon.com/sandbox/version/2.0/verifyReceiptId"
        } else {
            "https://appstore-sdk.amazon.com/version/2.0/verifyReceiptId"
        }
    }

    /// `handle` is `"{amazonUserId}:{receiptId}"` — Amazon's RVS endpoint is
    /// keyed on both, unlike Apple/Google where the transaction/purchase
    /// token alone is enough (spec §4.2's `subscription_handle` is
    /// provider-specific; for Amazon it packs both identifiers).
    async fn fetch_receipt(&self, app: &App, handle: &str) -> Result<AmazonReceiptResponse> {
        let cfg = app
            .amazon()
            .ok_or_else(|| AppError::ConfigurationMissing("app has no Amazon configuration".into()))?;

        let (user_id, receipt_id) = handle
            .split_once(':')
            .ok_or_else(|| AppError::ReceiptInvalid("Amazon handle must be \"userId:receiptId\"".into()))?;

        let url = format!(
            "{}/developer/{}/user/{}/receiptId/{}",
            Self::base_url(cfg.sandbox),
            cfg.app_id,
            user_id,
            receipt_id
        );

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| AppError::TransientUpstream(format!("Amazon RVS unreachable: {e}")))?;

        if !response.status().is_success() {
            return Err(AppError::TransientUpstream(format!("Amazon RVS returned {}", response.status())));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::TransientUpstream(format!("Amazon RVS returned malformed body: {e}")))
    }

    /// SNS requires the subscribing endpoint to prove receipt by visiting
    /// `SubscribeURL` before notifications will start flowing; until then the
    /// topic just sits unconfirmed and nothing is ever delivered.
    async fn confirm_subscription(&self, subscribe_url: Option<&str>) -> Result<()> {
        let url = subscribe_url
            .ok_or_else(|| AppError::ReceiptInvalid("SubscriptionConfirmation missing SubscribeURL".into()))?;

        if !signing_cert_host_is_trusted(url) {
            return Err(AppError::SignatureInvalid(format!(
                "refusing to confirm SNS subscription via untrusted host: {url}"
            )));
        }

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| AppError::TransientUpstream(format!("failed to confirm SNS subscription: {e}")))?;

        if !response.status().is_success() {
            return Err(AppError::TransientUpstream(format!(
                "SNS subscription confirmation returned {}",
                response.status()
            )));
        }

        tracing::info!("confirmed Amazon SNS topic subscription");
        Ok(())
    }
}

#[async_trait]
impl ProviderAdapter for AmazonAdapter {
    async fn verify_receipt(&self, app: &App, handle: &str) -> Result<CanonicalState> {
        let receipt = self.fetch_receipt(app, handle).await?;

        let status = if receipt.cancel_date.is_some() {
            SubscriptionStatus::Cancelled
        } else {
            SubscriptionStatus::Active
        };

        Ok(CanonicalState {
            platform: Platform::Amazon,
            status,
            product_id: receipt.sku,
            subscription_handle: handle.to_string(),
            purchase_date: millis_to_datetime(receipt.purchase_date),
            expires_date: receipt.renewal_date.map(millis_to_datetime),
            grace_period_expires_date: None,
            will_renew: receipt.auto_renewing.unwrap_or(true),
            is_sandbox: false,
            is_trial: false,
            revenue_amount: None,
            revenue_currency: None,
        })
    }

    async fn verify_notification(&self, app: &App, raw_body: &[u8], _headers: &HeaderMap) -> Result<StoreEvent> {
        let envelope: SnsNotification = serde_json::from_slice(raw_body)
            .map_err(|e| AppError::ReceiptInvalid(format!("malformed SNS envelope: {e}")))?;

        if envelope.message_type == "SubscriptionConfirmation" {
            self.confirm_subscription(envelope.subscribe_url.as_deref()).await?;
            return Err(AppError::AcknowledgedNoEvent(
                "confirmed SNS topic subscription".into(),
            ));
        }

        if envelope.message_type != "Notification" {
            return Err(AppError::ReceiptInvalid(format!(
                "unsupported SNS message type: {}",
                envelope.message_type
            )));
        }

        verify_sns_signature(
            &SnsEnvelope {
                message_type: &envelope.message_type,
                message: &envelope.message,
                message_id: &envelope.message_id,
                subject: envelope.subject.as_deref(),
                timestamp: &envelope.timestamp,
                topic_arn: &envelope.topic_arn,
                signing_cert_url: &envelope.signing_cert_url,
                signature: &envelope.signature,
            },
            &self.http,
        )
        .await
        .map_err(|e| AppError::SignatureInvalid(format!("SNS signature verification failed: {e}")))?;

        let rtn: AmazonRtn = serde_json::from_str(&envelope.message)
            .map_err(|e| AppError::ReceiptInvalid(format!("malformed Amazon RTN body: {e}")))?;

        let event_type = map_notification_type(&rtn.notification_type);
        let handle = format!("{}:{}", rtn.amazon_user_id, rtn.receipt_id);
        let receipt = self.fetch_receipt(app, &handle).await?;

        let status = match event_type {
            EventType::Cancellation => SubscriptionStatus::Cancelled,
            EventType::Expiration => SubscriptionStatus::Expired,
            _ if receipt.cancel_date.is_some() => SubscriptionStatus::Cancelled,
            _ => SubscriptionStatus::Active,
        };

        Ok(StoreEvent {
            app_id: app.id.clone(),
            platform: Platform::Amazon,
            notification_uuid: envelope.message_id,
            event_type,
            status,
            product_id: receipt.sku,
            subscription_handle: rtn.receipt_id,
            purchase_date: millis_to_datetime(receipt.purchase_date),
            expires_date: receipt.renewal_date.map(millis_to_datetime),
            grace_period_expires_date: None,
            event_time: parse_rfc3339(&envelope.timestamp).unwrap_or_else(Utc::now),
            will_renew: receipt.auto_renewing.unwrap_or(true),
            is_sandbox: false,
            is_trial: false,
            revenue_amount: None,
            revenue_currency: None,
            raw_payload: raw_body.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_known_notification_types() {
        assert_eq!(map_notification_type("SUBSCRIPTION_PURCHASED"), EventType::InitialPurchase);
        assert_eq!(map_notification_type("SUBSCRIPTION_EXPIRED"), EventType::Expiration);
        assert_eq!(map_notification_type("WEIRD_TYPE"), EventType::Unknown);
    }
}
