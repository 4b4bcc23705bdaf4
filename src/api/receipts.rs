use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::api::auth::AuthedApp;
use crate::api::AppState;
use crate::db::models::subscription::{Platform, Subscription};
use crate::error::{AppError, Result};
use crate::pipeline;
use crate::providers::types::{EventType, StoreEvent};
use crate::providers::ProviderAdapter;

#[derive(Debug, Deserialize)]
pub struct SubmitReceiptRequest {
    pub app_user_id: String,
    pub platform: Platform,
    pub receipt_data: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct SubmitReceiptResponse {
    pub app_user_id: String,
    pub entitlements: serde_json::Value,
}

/// `POST /v1/receipts` (spec §6): the client SDK's direct path for verifying
/// a purchase, independent of the provider-pushed notification path. Every
/// adapter's `verify_receipt` wants a single opaque handle; this picks the
/// right field out of `receipt_data` per platform.
pub async fn submit_receipt(
    State(state): State<Arc<AppState>>,
    AuthedApp(app): AuthedApp,
    Json(body): Json<SubmitReceiptRequest>,
) -> Result<Json<SubmitReceiptResponse>> {
    let handle = extract_handle(body.platform, &body.receipt_data)?;

    let canonical = match body.platform {
        Platform::Ios => state.apple.verify_receipt(&app, &handle).await?,
        Platform::Android => state.google.verify_receipt(&app, &handle).await?,
        Platform::Stripe => state.stripe.verify_receipt(&app, &handle).await?,
        Platform::Paddle => state.paddle.verify_receipt(&app, &handle).await?,
        Platform::Amazon => state.amazon.verify_receipt(&app, &handle).await?,
    };

    let existing =
        Subscription::find_by_provider_id(&app.id, canonical.platform, &canonical.subscription_handle, &state.pool).await?;
    let event_type = if existing.is_some() {
        EventType::SubscriptionUpdated
    } else {
        EventType::InitialPurchase
    };

    let event = StoreEvent {
        app_id: app.id.clone(),
        platform: canonical.platform,
        notification_uuid: format!("receipt-sync:{}:{}", canonical.platform, canonical.subscription_handle),
        event_type,
        status: canonical.status,
        product_id: canonical.product_id,
        subscription_handle: canonical.subscription_handle,
        purchase_date: canonical.purchase_date,
        expires_date: canonical.expires_date,
        grace_period_expires_date: canonical.grace_period_expires_date,
        event_time: Utc::now(),
        will_renew: canonical.will_renew,
        is_sandbox: canonical.is_sandbox,
        is_trial: canonical.is_trial,
        revenue_amount: canonical.revenue_amount,
        revenue_currency: canonical.revenue_currency,
        raw_payload: Vec::new(),
    };

    let result = pipeline::apply_store_event(&app, &event, &body.app_user_id, &state.http, &state.pool).await?;

    Ok(Json(SubmitReceiptResponse {
        app_user_id: body.app_user_id,
        entitlements: crate::entitlements::entitlements_to_json(&result.entitlements),
    }))
}

fn extract_handle(platform: Platform, receipt_data: &serde_json::Value) -> Result<String> {
    if platform == Platform::Amazon {
        return extract_amazon_handle(receipt_data);
    }

    let field = match platform {
        Platform::Ios => "transaction_id",
        Platform::Android => "purchase_token",
        Platform::Stripe | Platform::Paddle => "subscription_id",
        Platform::Amazon => unreachable!(),
    };
    receipt_data
        .get(field)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| AppError::ValidationError(format!("receipt_data.{field} is required for this platform")))
}

fn extract_amazon_handle(receipt_data: &serde_json::Value) -> Result<String> {
    let user_id = receipt_data
        .get("user_id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| AppError::ValidationError("receipt_data.user_id is required for amazon".into()))?;
    let receipt_id = receipt_data
        .get("receipt_id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| AppError::ValidationError("receipt_data.receipt_id is required for amazon".into()))?;
    Ok(format!("{user_id}:{receipt_id}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_ios_handle_from_transaction_id() {
        let data = serde_json::json!({ "transaction_id": "2000000123456789" });
        assert_eq!(extract_handle(Platform::Ios, &data).unwrap(), "2000000123456789");
    }

    #[test]
    fn extracts_android_handle_from_purchase_token() {
        let data = serde_json::json!({ "purchase_token": "tok-abc" });
        assert_eq!(extract_handle(Platform::Android, &data).unwrap(), "tok-abc");
    }

    #[test]
    fn extracts_stripe_and_paddle_handle_from_subscription_id() {
        let data = serde_json::json!({ "subscription_id": "sub_123" });
        assert_eq!(extract_handle(Platform::Stripe, &data).unwrap(), "sub_123");
        assert_eq!(extract_handle(Platform::Paddle, &data).unwrap(), "sub_123");
    }

    #[test]
    fn amazon_handle_joins_user_and_receipt_id() {
        let data = serde_json::json!({ "user_id": "u1", "receipt_id": "r1" });
        assert_eq!(extract_handle(Platform::Amazon, &data).unwrap(), "u1:r1");
    }

    #[test]
    fn missing_field_is_a_validation_error() {
        let data = serde_json::json!({});
        assert!(matches!(extract_handle(Platform::Ios, &data), Err(AppError::ValidationError(_))));
        assert!(matches!(extract_handle(Platform::Amazon, &data), Err(AppError::ValidationError(_))));
    }
}
