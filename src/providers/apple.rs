use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::crypto::es256::sign_app_store_api_token;
use crate::crypto::x5c::verify_x5c_chain;
use crate::db::models::App;
use crate::db::models::subscription::{Platform, SubscriptionStatus};
use crate::error::{AppError, Result};
use crate::providers::types::{CanonicalState, EventType, StoreEvent};
use crate::providers::ProviderAdapter;

#[derive(Debug, Deserialize)]
struct JwsHeader {
    alg: String,
    x5c: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct NotificationPayload {
    #[serde(rename = "notificationType")]
    notification_type: String,
    subtype: Option<String>,
    #[serde(rename = "notificationUUID")]
    notification_uuid: String,
    data: NotificationData,
    #[serde(rename = "signedDate")]
    signed_date: i64,
}

#[derive(Debug, Deserialize)]
struct NotificationData {
    environment: Option<String>,
    #[serde(rename = "signedTransactionInfo")]
    signed_transaction_info: Option<String>,
    #[serde(rename = "signedRenewalInfo")]
    signed_renewal_info: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TransactionInfo {
    #[serde(rename = "transactionId")]
    transaction_id: String,
    #[serde(rename = "originalTransactionId")]
    original_transaction_id: String,
    #[serde(rename = "productId")]
    product_id: String,
    #[serde(rename = "purchaseDate")]
    purchase_date: i64,
    #[serde(rename = "expiresDate")]
    expires_date: Option<i64>,
    #[serde(rename = "type")]
    transaction_type: String,
    #[serde(rename = "revocationDate")]
    revocation_date: Option<i64>,
    price: Option<i64>,
    currency: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RenewalInfo {
    #[serde(rename = "autoRenewStatus")]
    auto_renew_status: i64,
    #[serde(rename = "gracePeriodExpiresDate")]
    grace_period_expires_date: Option<i64>,
    #[serde(rename = "isInBillingRetryPeriod")]
    is_in_billing_retry_period: Option<bool>,
}

/// Splits a compact JWS (`header.payload.signature`), validates its x5c
/// chain against the tenant's pinned roots, and returns the decoded JSON
/// payload. Used for both the outer notification envelope and the nested
/// `signedTransactionInfo`/`signedRenewalInfo` JWS strings, which are
/// signed independently (spec §4.2).
fn decode_and_verify_jws(jws: &str, pinned_root_fingerprints: &[String]) -> Result<Value> {
    let parts: Vec<&str> = jws.split('.').collect();
    if parts.len() != 3 {
        return Err(AppError::SignatureInvalid("malformed JWS: expected 3 segments".into()));
    }

    let header_bytes = URL_SAFE_NO_PAD
        .decode(parts[0])
        .map_err(|e| AppError::SignatureInvalid(format!("invalid JWS header encoding: {e}")))?;
    let header: JwsHeader = serde_json::from_slice(&header_bytes)
        .map_err(|e| AppError::SignatureInvalid(format!("invalid JWS header: {e}")))?;

    if header.alg != "ES256" {
        return Err(AppError::SignatureInvalid(format!("unexpected JWS algorithm: {}", header.alg)));
    }

    let decoding_key = verify_x5c_chain(&header.x5c, pinned_root_fingerprints)
        .map_err(|e| AppError::SignatureInvalid(format!("x5c chain validation failed: {e}")))?;

    let mut validation = jsonwebtoken::Validation::new(jsonwebtoken::Algorithm::ES256);
    validation.validate_exp = false;
    validation.required_spec_claims.clear();

    let token_data = jsonwebtoken::decode::<Value>(jws, &decoding_key, &validation)
        .map_err(|e| AppError::SignatureInvalid(format!("JWS signature verification failed: {e}")))?;

    Ok(token_data.claims)
}

fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis).single().unwrap_or_else(Utc::now)
}

fn map_notification_type(notification_type: &str, subtype: Option<&str>) -> EventType {
    match (notification_type, subtype.unwrap_or("")) {
        ("SUBSCRIBED", "INITIAL_BUY") => EventType::InitialPurchase,
        ("SUBSCRIBED", "RESUBSCRIBE") => EventType::Reactivation,
        ("DID_RENEW", "") => EventType::Renewal,
        ("DID_RENEW", "BILLING_RECOVERY") => EventType::BillingRecovery,
        ("EXPIRED", _) => EventType::Expiration,
        ("DID_FAIL_TO_RENEW", "GRACE_PERIOD") => EventType::GracePeriodStarted,
        ("DID_FAIL_TO_RENEW", _) => EventType::BillingIssue,
        ("GRACE_PERIOD_EXPIRED", _) => EventType::GracePeriodExpired,
        ("DID_CHANGE_RENEWAL_STATUS", "AUTO_RENEW_DISABLED") => EventType::Cancellation,
        ("DID_CHANGE_RENEWAL_STATUS", "AUTO_RENEW_ENABLED") => EventType::SubscriptionUpdated,
        ("DID_CHANGE_RENEWAL_PREF", "UPGRADE") | ("DID_CHANGE_RENEWAL_PREF", "DOWNGRADE") => EventType::ProductChange,
        ("OFFER_REDEEMED", _) => EventType::OfferRedeemed,
        ("PRICE_INCREASE", _) => EventType::PriceIncrease,
        ("REFUND", _) => EventType::Refund,
        ("REVOKE", _) => EventType::Revocation,
        ("RENEWAL_EXTENDED", _) | ("RENEWAL_EXTENSION", _) => EventType::RenewalExtended,
        ("CONSUMPTION_REQUEST", _) => EventType::Unknown,
        _ => EventType::Unknown,
    }
}

fn map_transaction_type(raw: &str) -> SubscriptionStatus {
    match raw {
        "Auto-Renewable Subscription" => SubscriptionStatus::Active,
        _ => SubscriptionStatus::Active,
    }
}

struct CachedJwt {
    token: String,
    expires_at: DateTime<Utc>,
}

pub struct AppleAdapter {
    http: Client,
    /// Keyed by app id, since each tenant signs with its own key pair
    /// (spec §5's "Apple JWT cache" — one slot per tenant, not a single
    /// global one).
    jwt_cache: RwLock<HashMap<String, CachedJwt>>,
}

impl AppleAdapter {
    pub fn new(http: Client) -> Self {
        Self {
            http,
            jwt_cache: RwLock::new(HashMap::new()),
        }
    }

    fn base_urls(is_sandbox: bool) -> &'static str {
        if is_sandbox {
            "https://api.storekit-sandbox.itunes.apple.com"
        } else {
            "https://api.storekit.itunes.apple.com"
        }
    }

    /// Builds (or reuses a cached) ES256 App Store Server API JWT, good for
    /// 10 minutes, refreshed 5 minutes before expiry (spec §4.2).
    async fn api_token(&self, app: &App) -> Result<String> {
        {
            let cache = self.jwt_cache.read().await;
            if let Some(cached) = cache.get(&app.id) {
                if cached.expires_at > Utc::now() + chrono::Duration::minutes(5) {
                    return Ok(cached.token.clone());
                }
            }
        }

        let cfg = app
            .apple()
            .ok_or_else(|| AppError::ConfigurationMissing("app has no Apple configuration".into()))?;

        let token = sign_app_store_api_token(&cfg.key_id, &cfg.issuer_id, &cfg.bundle_id, &cfg.private_key_pem)
            .map_err(|e| AppError::ConfigurationMissing(format!("invalid Apple API credentials: {e}")))?;

        let mut cache = self.jwt_cache.write().await;
        cache.insert(
            app.id.clone(),
            CachedJwt {
                token: token.clone(),
                expires_at: Utc::now() + chrono::Duration::minutes(10),
            },
        );

        Ok(token)
    }

    async fn fetch_transaction_info(&self, app: &App, transaction_id: &str) -> Result<Value> {
        let cfg = app
            .apple()
            .ok_or_else(|| AppError::ConfigurationMissing("app has no Apple configuration".into()))?;

        let token = self.api_token(app).await?;

        // Production first, sandbox fallback, per Apple's documented client behavior.
        for base in [Self::base_urls(false), Self::base_urls(true)] {
            let url = format!("{base}/inApps/v1/transactions/{transaction_id}");
            let response = self
                .http
                .get(&url)
                .bearer_auth(&token)
                .send()
                .await;

            match response {
                Ok(resp) if resp.status().is_success() => {
                    let body: Value = resp
                        .json()
                        .await
                        .map_err(|e| AppError::TransientUpstream(format!("invalid Apple API response: {e}")))?;
                    let signed = body
                        .get("signedTransactionInfo")
                        .and_then(Value::as_str)
                        .ok_or_else(|| AppError::TransientUpstream("Apple response missing signedTransactionInfo".into()))?;
                    return decode_and_verify_jws(signed, &cfg.pinned_root_fingerprints);
                }
                _ => continue,
            }
        }

        Err(AppError::TransientUpstream("Apple App Store Server API unreachable on production and sandbox".into()))
    }
}

#[async_trait]
impl ProviderAdapter for AppleAdapter {
    async fn verify_receipt(&self, app: &App, handle: &str) -> Result<CanonicalState> {
        let transaction_value = self.fetch_transaction_info(app, handle).await?;
        let transaction: TransactionInfo = serde_json::from_value(transaction_value)
            .map_err(|e| AppError::ReceiptInvalid(format!("malformed Apple transaction info: {e}")))?;

        Ok(CanonicalState {
            platform: Platform::Ios,
            status: map_transaction_type(&transaction.transaction_type),
            product_id: transaction.product_id,
            subscription_handle: transaction.original_transaction_id,
            purchase_date: millis_to_datetime(transaction.purchase_date),
            expires_date: transaction.expires_date.map(millis_to_datetime),
            grace_period_expires_date: None,
            will_renew: true,
            is_sandbox: false,
            is_trial: false,
            revenue_amount: transaction.price,
            revenue_currency: transaction.currency,
        })
    }

    async fn verify_notification(&self, app: &App, raw_body: &[u8], _headers: &axum::http::HeaderMap) -> Result<StoreEvent> {
        let cfg = app
            .apple()
            .ok_or_else(|| AppError::ConfigurationMissing("app has no Apple configuration".into()))?;

        #[derive(Deserialize)]
        struct Envelope {
            #[serde(rename = "signedPayload")]
            signed_payload: String,
        }

        let envelope: Envelope = serde_json::from_slice(raw_body)
            .map_err(|e| AppError::ReceiptInvalid(format!("malformed Apple notification envelope: {e}")))?;

        let payload_value = decode_and_verify_jws(&envelope.signed_payload, &cfg.pinned_root_fingerprints)?;
        let payload: NotificationPayload = serde_json::from_value(payload_value)
            .map_err(|e| AppError::ReceiptInvalid(format!("malformed Apple notification payload: {e}")))?;

        let event_type = map_notification_type(&payload.notification_type, payload.subtype.as_deref());

        let transaction: Option<TransactionInfo> = match &payload.data.signed_transaction_info {
            Some(jws) => {
                let value = decode_and_verify_jws(jws, &cfg.pinned_root_fingerprints)?;
                Some(
                    serde_json::from_value(value)
                        .map_err(|e| AppError::ReceiptInvalid(format!("malformed signedTransactionInfo: {e}")))?,
                )
            }
            None => None,
        };

        let renewal: Option<RenewalInfo> = match &payload.data.signed_renewal_info {
            Some(jws) => {
                let value = decode_and_verify_jws(jws, &cfg.pinned_root_fingerprints)?;
                Some(
                    serde_json::from_value(value)
                        .map_err(|e| AppError::ReceiptInvalid(format!("malformed signedRenewalInfo: {e}")))?,
                )
            }
            None => None,
        };

        let transaction = transaction
            .ok_or_else(|| AppError::ReceiptInvalid("Apple notification missing signedTransactionInfo".into()))?;

        let is_sandbox = payload.data.environment.as_deref() == Some("Sandbox");
        let will_renew = renewal.as_ref().map(|r| r.auto_renew_status == 1).unwrap_or(true);
        let grace_period_expires_date = renewal
            .as_ref()
            .and_then(|r| r.grace_period_expires_date)
            .map(millis_to_datetime);

        let status = match event_type {
            EventType::Expiration | EventType::GracePeriodExpired => SubscriptionStatus::Expired,
            EventType::Refund | EventType::Revocation => SubscriptionStatus::Cancelled,
            EventType::BillingIssue => SubscriptionStatus::BillingRetry,
            EventType::GracePeriodStarted => SubscriptionStatus::GracePeriod,
            _ => SubscriptionStatus::Active,
        };

        Ok(StoreEvent {
            app_id: app.id.clone(),
            platform: Platform::Ios,
            notification_uuid: payload.notification_uuid,
            event_type,
            status,
            product_id: transaction.product_id,
            subscription_handle: transaction.original_transaction_id,
            purchase_date: millis_to_datetime(transaction.purchase_date),
            expires_date: transaction.expires_date.map(millis_to_datetime),
            grace_period_expires_date,
            event_time: millis_to_datetime(payload.signed_date),
            will_renew,
            is_sandbox,
            is_trial: false,
            revenue_amount: transaction.price,
            revenue_currency: transaction.currency,
            raw_payload: raw_body.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_initial_buy_to_initial_purchase() {
        assert_eq!(map_notification_type("SUBSCRIBED", Some("INITIAL_BUY")), EventType::InitialPurchase);
    }

    #[test]
    fn maps_unrecognized_subtype_to_unknown() {
        assert_eq!(map_notification_type("SOMETHING_NEW", Some("WEIRD")), EventType::Unknown);
    }

    #[test]
    fn millis_round_trip() {
        let dt = millis_to_datetime(1_700_000_000_000);
        assert_eq!(dt.timestamp_millis(), 1_700_000_000_000);
    }
}
