use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::api::auth::AuthedApp;
use crate::api::AppState;
use crate::db::models::subscriber::Subscriber;
use crate::db::models::subscription::Subscription;
use crate::entitlements;
use crate::error::{AppError, Result};

#[derive(Debug, Serialize)]
pub struct SubscriberResponse {
    pub app_user_id: String,
    pub first_seen_at: chrono::DateTime<chrono::Utc>,
    pub last_seen_at: chrono::DateTime<chrono::Utc>,
    pub subscriptions: Vec<Subscription>,
    pub entitlements: serde_json::Value,
}

/// `GET /v1/subscribers/{app_user_id}` (spec §6): the current entitlement
/// snapshot for a single end user, scoped to the authenticated app.
pub async fn get_subscriber(
    State(state): State<Arc<AppState>>,
    AuthedApp(app): AuthedApp,
    Path(app_user_id): Path<String>,
) -> Result<Json<SubscriberResponse>> {
    let subscriber = Subscriber::find_by_app_user_id(&app.id, &app_user_id, &state.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("no subscriber {app_user_id}")))?;

    let subscriptions = Subscription::list_by_subscriber(&subscriber.id, &state.pool).await?;
    let result = entitlements::calculate(&app.id, subscriptions, &state.pool).await?;

    Ok(Json(SubscriberResponse {
        app_user_id: subscriber.app_user_id,
        first_seen_at: subscriber.first_seen_at,
        last_seen_at: subscriber.last_seen_at,
        subscriptions: result.subscriptions,
        entitlements: entitlements::entitlements_to_json(&result.entitlements),
    }))
}

#[derive(Debug, Deserialize)]
pub struct DeleteQuery {
    #[serde(default)]
    pub confirm: bool,
}

/// `DELETE /v1/subscribers/{app_user_id}?confirm=true` (spec §6): GDPR erase.
/// Requires the explicit `confirm` flag since this cascades to every
/// subscription and transaction the subscriber owns and can't be undone.
pub async fn delete_subscriber(
    State(state): State<Arc<AppState>>,
    AuthedApp(app): AuthedApp,
    Path(app_user_id): Path<String>,
    Query(query): Query<DeleteQuery>,
) -> Result<Json<serde_json::Value>> {
    if !query.confirm {
        return Err(AppError::BadRequest("pass ?confirm=true to erase this subscriber".into()));
    }

    let subscriber = Subscriber::find_by_app_user_id(&app.id, &app_user_id, &state.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("no subscriber {app_user_id}")))?;

    subscriber.delete_cascade(&state.pool).await?;

    Ok(Json(serde_json::json!({ "deleted": true })))
}
