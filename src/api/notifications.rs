use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::api::AppState;
use crate::db::models::App;
use crate::error::{AppError, Result};
use crate::idempotency;
use crate::pipeline;
use crate::providers::types::StoreEvent;
use crate::providers::ProviderAdapter;

/// Every notification route returns 200 for anything except a bad signature
/// (spec §4.3/error.rs's taxonomy note): providers interpret non-2xx as "try
/// again", and replaying a processing bug at them forever helps no one.
async fn respond(result: Result<()>) -> (StatusCode, Json<Value>) {
    match result {
        Ok(()) => (StatusCode::OK, Json(json!({ "received": true }))),
        Err(AppError::DuplicateNotification) => (StatusCode::OK, Json(json!({ "received": true, "duplicate": true }))),
        Err(AppError::AcknowledgedNoEvent(reason)) => {
            tracing::info!(reason, "notification acknowledged without a domain event");
            (StatusCode::OK, Json(json!({ "received": true })))
        }
        Err(AppError::SignatureInvalid(message)) => {
            tracing::warn!(error = %message, "rejecting notification with invalid signature");
            (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": { "code": "signature_invalid", "message": message } })),
            )
        }
        Err(e) => {
            tracing::error!(error = %e, "notification processing failed, acknowledging to avoid a provider retry storm");
            (StatusCode::OK, Json(json!({ "received": true })))
        }
    }
}

async fn load_app(app_id: &str, state: &AppState) -> Result<App> {
    App::find_by_id(app_id, &state.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("no app {app_id}")))
}

/// Idempotency gate, subscriber resolution, and the normalizer/entitlement/
/// fan-out pipeline, shared by every provider once it has a verified
/// `StoreEvent` (spec §4.3-§4.7).
async fn ingest(state: &AppState, app: &App, event: StoreEvent, app_user_id: Option<String>) -> Result<()> {
    idempotency::check_and_reserve(
        &app.id,
        event.platform,
        &event.notification_uuid,
        &event.event_type.to_string(),
        &state.pool,
    )
    .await?;

    let app_user_id = match app_user_id {
        Some(id) => id,
        None => pipeline::resolve_app_user_id(&app.id, event.platform, &event.subscription_handle, &state.pool).await?,
    };

    pipeline::apply_store_event(app, &event, &app_user_id, &state.http, &state.pool).await?;
    Ok(())
}

pub async fn handle_apple(
    State(state): State<Arc<AppState>>,
    Path(app_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    let result = async {
        let app = load_app(&app_id, &state).await?;
        let event = state.apple.verify_notification(&app, &body, &headers).await?;
        ingest(&state, &app, event, None).await
    }
    .await;
    respond(result).await
}

pub async fn handle_google(
    State(state): State<Arc<AppState>>,
    Path(app_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    let result = async {
        let app = load_app(&app_id, &state).await?;
        let event = state.google.verify_notification(&app, &body, &headers).await?;
        ingest(&state, &app, event, None).await
    }
    .await;
    respond(result).await
}

pub async fn handle_stripe(
    State(state): State<Arc<AppState>>,
    Path(app_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    let result = async {
        let app = load_app(&app_id, &state).await?;
        let event = state.stripe.verify_notification(&app, &body, &headers).await?;
        ingest(&state, &app, event, None).await
    }
    .await;
    respond(result).await
}

pub async fn handle_amazon(
    State(state): State<Arc<AppState>>,
    Path(app_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    let result = async {
        let app = load_app(&app_id, &state).await?;
        let event = state.amazon.verify_notification(&app, &body, &headers).await?;
        ingest(&state, &app, event, None).await
    }
    .await;
    respond(result).await
}

#[derive(Debug, Deserialize)]
struct PaddlePassthrough {
    app_id: String,
    #[serde(default)]
    app_user_id: Option<String>,
}

/// Paddle is the one provider with no `{app_id}` path segment: its alerts
/// carry the tenant in a `passthrough` JSON field the merchant set up at
/// checkout time (spec §4.2). The field is read before signature
/// verification purely to know which app's public key to verify against —
/// `PaddleAdapter::verify_notification` still rejects the request outright
/// if the signature doesn't check out against that app's key.
pub async fn handle_paddle(State(state): State<Arc<AppState>>, headers: HeaderMap, body: Bytes) -> (StatusCode, Json<Value>) {
    let result = async {
        let (app_id, app_user_id) = read_passthrough(&body)?;
        let app = load_app(&app_id, &state).await?;
        let event = state.paddle.verify_notification(&app, &body, &headers).await?;
        ingest(&state, &app, event, app_user_id).await
    }
    .await;
    respond(result).await
}

fn read_passthrough(raw_body: &[u8]) -> Result<(String, Option<String>)> {
    let body_str = std::str::from_utf8(raw_body).map_err(|_| AppError::ReceiptInvalid("Paddle payload is not valid UTF-8".into()))?;
    let fields: BTreeMap<String, String> =
        serde_urlencoded::from_str(body_str).map_err(|e| AppError::ReceiptInvalid(format!("malformed Paddle form body: {e}")))?;

    let passthrough = fields
        .get("passthrough")
        .ok_or_else(|| AppError::ReceiptInvalid("Paddle payload missing passthrough".into()))?;
    let decoded: PaddlePassthrough =
        serde_json::from_str(passthrough).map_err(|e| AppError::ReceiptInvalid(format!("malformed Paddle passthrough: {e}")))?;

    Ok((decoded.app_id, decoded.app_user_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_app_id_and_app_user_id_from_passthrough() {
        let body = "alert_name=subscription_payment_succeeded&passthrough=%7B%22app_id%22%3A%22app-1%22%2C%22app_user_id%22%3A%22user-1%22%7D";
        let (app_id, app_user_id) = read_passthrough(body.as_bytes()).unwrap();
        assert_eq!(app_id, "app-1");
        assert_eq!(app_user_id.as_deref(), Some("user-1"));
    }

    #[test]
    fn app_user_id_is_optional_in_passthrough() {
        let body = "passthrough=%7B%22app_id%22%3A%22app-1%22%7D";
        let (app_id, app_user_id) = read_passthrough(body.as_bytes()).unwrap();
        assert_eq!(app_id, "app-1");
        assert!(app_user_id.is_none());
    }

    #[test]
    fn missing_passthrough_is_rejected() {
        let body = "alert_name=subscription_payment_succeeded";
        assert!(read_passthrough(body.as_bytes()).is_err());
    }

    #[test]
    fn non_json_passthrough_is_rejected() {
        let body = "passthrough=not-json";
        assert!(read_passthrough(body.as_bytes()).is_err());
    }
}
