use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::crypto::rs256::sign_service_account_assertion;
use crate::db::models::App;
use crate::db::models::subscription::{Platform, SubscriptionStatus};
use crate::error::{AppError, Result};
use crate::providers::types::{CanonicalState, EventType, StoreEvent};
use crate::providers::ProviderAdapter;

const PLAY_DEVELOPER_SCOPE: &str = "https://www.googleapis.com/auth/androidpublisher";

/// Google's Pub/Sub push delivery envelope. `data` is the base64-encoded
/// RTDN JSON body.
#[derive(Debug, Deserialize)]
struct PubSubEnvelope {
    message: PubSubMessage,
}

#[derive(Debug, Deserialize)]
struct PubSubMessage {
    data: String,
    #[serde(rename = "messageId")]
    message_id: String,
    #[serde(rename = "publishTime")]
    publish_time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RtdnPayload {
    #[serde(rename = "packageName")]
    package_name: String,
    #[serde(rename = "subscriptionNotification")]
    subscription_notification: Option<SubscriptionNotification>,
    #[serde(rename = "testNotification")]
    test_notification: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct SubscriptionNotification {
    #[serde(rename = "notificationType")]
    notification_type: i64,
    #[serde(rename = "purchaseToken")]
    purchase_token: String,
    #[serde(rename = "subscriptionId")]
    subscription_id: String,
}

#[derive(Debug, Deserialize)]
struct SubscriptionPurchaseV2 {
    #[serde(rename = "subscriptionState")]
    subscription_state: String,
    #[serde(rename = "lineItems")]
    line_items: Vec<LineItem>,
    #[serde(rename = "linkedPurchaseToken")]
    linked_purchase_token: Option<String>,
    #[serde(rename = "startTime")]
    start_time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LineItem {
    #[serde(rename = "productId")]
    product_id: String,
    #[serde(rename = "expiryTime")]
    expiry_time: Option<String>,
    #[serde(rename = "autoRenewingPlan")]
    auto_renewing_plan: Option<AutoRenewingPlan>,
}

#[derive(Debug, Deserialize)]
struct AutoRenewingPlan {
    #[serde(rename = "autoRenewEnabled")]
    auto_renew_enabled: Option<bool>,
}

/// Google's numeric notificationType codes (Real-time Developer
/// Notifications reference). `1`=RECOVERED, `2`=RENEWED, `3`=CANCELED,
/// `4`=PURCHASED, `5`=ON_HOLD, `6`=IN_GRACE_PERIOD, `7`=RESTARTED,
/// `9`=DEFERRED, `10`=PAUSED, `11`=PAUSE_SCHEDULE_CHANGED, `12`=REVOKED,
/// `13`=EXPIRED, `20`=PRICE_CHANGE_CONFIRMED.
fn map_notification_type(code: i64) -> EventType {
    match code {
        1 => EventType::BillingRecovery,
        2 => EventType::Renewal,
        3 => EventType::Cancellation,
        4 => EventType::InitialPurchase,
        5 => EventType::BillingIssue,
        6 => EventType::GracePeriodStarted,
        7 => EventType::Reactivation,
        9 => EventType::ProductChange,
        10 => EventType::Paused,
        11 => EventType::PauseScheduled,
        12 => EventType::Revocation,
        13 => EventType::Expiration,
        20 => EventType::PriceIncrease,
        _ => EventType::Unknown,
    }
}

fn map_subscription_state(state: &str) -> SubscriptionStatus {
    match state {
        "SUBSCRIPTION_STATE_ACTIVE" => SubscriptionStatus::Active,
        "SUBSCRIPTION_STATE_CANCELED" => SubscriptionStatus::Cancelled,
        "SUBSCRIPTION_STATE_IN_GRACE_PERIOD" => SubscriptionStatus::GracePeriod,
        "SUBSCRIPTION_STATE_ON_HOLD" => SubscriptionStatus::BillingRetry,
        "SUBSCRIPTION_STATE_PAUSED" => SubscriptionStatus::Paused,
        "SUBSCRIPTION_STATE_EXPIRED" => SubscriptionStatus::Expired,
        _ => SubscriptionStatus::Expired,
    }
}

fn parse_rfc3339(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.with_timezone(&Utc))
}

struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

pub struct GoogleAdapter {
    http: Client,
    /// Keyed by app id: each tenant holds its own service account, so a
    /// single cache slot would leak one tenant's bearer token to another's
    /// requests.
    token_cache: RwLock<HashMap<String, CachedToken>>,
}

impl GoogleAdapter {
    pub fn new(http: Client) -> Self {
        Self {
            http,
            token_cache: RwLock::new(HashMap::new()),
        }
    }

    /// Exchanges the service-account RS256 assertion for an OAuth2 bearer
    /// token, reusing a cached one until shortly before expiry. Mirrors the
    /// App Store Server API token's "build once, reuse within lifetime"
    /// shape but with an actual token-exchange round trip, since Google
    /// requires the extra OAuth2 hop that Apple doesn't.
    async fn access_token(&self, app: &App) -> Result<String> {
        {
            let cache = self.token_cache.read().await;
            if let Some(cached) = cache.get(&app.id) {
                if cached.expires_at > Utc::now() + chrono::Duration::seconds(30) {
                    return Ok(cached.token.clone());
                }
            }
        }

        let cfg = app
            .google()
            .ok_or_else(|| AppError::ConfigurationMissing("app has no Google configuration".into()))?;

        let assertion = sign_service_account_assertion(
            &cfg.service_account_email,
            &cfg.service_private_key_pem,
            PLAY_DEVELOPER_SCOPE,
        )
        .map_err(|e| AppError::ConfigurationMissing(format!("invalid Google service account key: {e}")))?;

        #[derive(Deserialize)]
        struct TokenResponse {
            access_token: String,
            expires_in: i64,
        }

        let response: TokenResponse = self
            .http
            .post("https://oauth2.googleapis.com/token")
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", &assertion),
            ])
            .send()
            .await
            .map_err(|e| AppError::TransientUpstream(format!("Google token exchange failed: {e}")))?
            .json()
            .await
            .map_err(|e| AppError::TransientUpstream(format!("Google token exchange returned malformed body: {e}")))?;

        let expires_at = Utc::now() + chrono::Duration::seconds(response.expires_in);
        let token = response.access_token;

        let mut cache = self.token_cache.write().await;
        cache.insert(
            app.id.clone(),
            CachedToken {
                token: token.clone(),
                expires_at,
            },
        );

        Ok(token)
    }

    async fn fetch_subscription_v2(&self, app: &App, purchase_token: &str) -> Result<SubscriptionPurchaseV2> {
        let cfg = app
            .google()
            .ok_or_else(|| AppError::ConfigurationMissing("app has no Google configuration".into()))?;
        let token = self.access_token(app).await?;

        let url = format!(
            "https://androidpublisher.googleapis.com/androidpublisher/v3/applications/{}/purchases/subscriptionsv2/tokens/{}",
            cfg.package_name, purchase_token
        );

        let response = self
            .http
            .get(&url)
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|e| AppError::TransientUpstream(format!("Google Play Developer API unreachable: {e}")))?;

        if !response.status().is_success() {
            return Err(AppError::TransientUpstream(format!(
                "Google Play Developer API returned {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::TransientUpstream(format!("Google Play Developer API returned malformed body: {e}")))
    }
}

#[async_trait]
impl ProviderAdapter for GoogleAdapter {
    async fn verify_receipt(&self, app: &App, handle: &str) -> Result<CanonicalState> {
        let subscription = self.fetch_subscription_v2(app, handle).await?;
        let line_item = subscription
            .line_items
            .first()
            .ok_or_else(|| AppError::ReceiptInvalid("Google subscription has no line items".into()))?;

        Ok(CanonicalState {
            platform: Platform::Android,
            status: map_subscription_state(&subscription.subscription_state),
            product_id: line_item.product_id.clone(),
            subscription_handle: handle.to_string(),
            purchase_date: subscription.start_time.as_deref().and_then(parse_rfc3339).unwrap_or_else(Utc::now),
            expires_date: line_item.expiry_time.as_deref().and_then(parse_rfc3339),
            grace_period_expires_date: None,
            will_renew: line_item
                .auto_renewing_plan
                .as_ref()
                .and_then(|p| p.auto_renew_enabled)
                .unwrap_or(true),
            is_sandbox: false,
            is_trial: false,
            revenue_amount: None,
            revenue_currency: None,
        })
    }

    async fn verify_notification(&self, app: &App, raw_body: &[u8], _headers: &axum::http::HeaderMap) -> Result<StoreEvent> {
        let envelope: PubSubEnvelope = serde_json::from_slice(raw_body)
            .map_err(|e| AppError::ReceiptInvalid(format!("malformed Pub/Sub envelope: {e}")))?;

        let decoded = STANDARD
            .decode(&envelope.message.data)
            .map_err(|e| AppError::ReceiptInvalid(format!("Pub/Sub message data is not valid base64: {e}")))?;

        let rtdn: RtdnPayload = serde_json::from_slice(&decoded)
            .map_err(|e| AppError::ReceiptInvalid(format!("malformed RTDN payload: {e}")))?;

        let event_time = envelope.message.publish_time.as_deref().and_then(parse_rfc3339).unwrap_or_else(Utc::now);

        let cfg = app
            .google()
            .ok_or_else(|| AppError::ConfigurationMissing("app has no Google configuration".into()))?;
        if rtdn.package_name != cfg.package_name {
            return Err(AppError::SignatureInvalid(format!(
                "RTDN package name {} does not match configured {}",
                rtdn.package_name, cfg.package_name
            )));
        }

        let subscription_notification = rtdn
            .subscription_notification
            .ok_or_else(|| AppError::ReceiptInvalid("RTDN carries no subscriptionNotification".into()))?;

        let event_type = map_notification_type(subscription_notification.notification_type);

        // Google's RTDN only carries the event code; the authoritative
        // state (spec §4.4's tie-break rule) comes from a v2 API re-read.
        let authoritative = self
            .fetch_subscription_v2(app, &subscription_notification.purchase_token)
            .await?;
        let line_item = authoritative
            .line_items
            .iter()
            .find(|li| li.product_id == subscription_notification.subscription_id)
            .or_else(|| authoritative.line_items.first())
            .ok_or_else(|| AppError::ReceiptInvalid("Google subscription has no line items".into()))?;

        Ok(StoreEvent {
            app_id: app.id.clone(),
            platform: Platform::Android,
            notification_uuid: envelope.message.message_id,
            event_type,
            status: map_subscription_state(&authoritative.subscription_state),
            product_id: line_item.product_id.clone(),
            subscription_handle: subscription_notification.purchase_token,
            purchase_date: authoritative
                .start_time
                .as_deref()
                .and_then(parse_rfc3339)
                .unwrap_or_else(Utc::now),
            expires_date: line_item.expiry_time.as_deref().and_then(parse_rfc3339),
            grace_period_expires_date: None,
            event_time,
            will_renew: line_item
                .auto_renewing_plan
                .as_ref()
                .and_then(|p| p.auto_renew_enabled)
                .unwrap_or(true),
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
    fn maps_known_codes() {
        assert_eq!(map_notification_type(4), EventType::InitialPurchase);
        assert_eq!(map_notification_type(13), EventType::Expiration);
        assert_eq!(map_notification_type(999), EventType::Unknown);
    }

    #[test]
    fn maps_subscription_states() {
        assert_eq!(map_subscription_state("SUBSCRIPTION_STATE_ACTIVE"), SubscriptionStatus::Active);
        assert_eq!(map_subscription_state("SUBSCRIPTION_STATE_PAUSED"), SubscriptionStatus::Paused);
    }
}
