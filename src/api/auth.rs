use axum::extract::{FromRef, FromRequestParts};
use axum::http::request::Parts;
use std::sync::Arc;

use crate::api::AppState;
use crate::db::models::App;
use crate::error::AppError;

/// The tenant resolved from the `X-API-Key` header (spec §6's app-API-key
/// auth on the receipts/subscribers routes). Extracted once per request so
/// handlers never touch the header directly.
pub struct AuthedApp(pub App);

#[async_trait::async_trait]
impl<S> FromRequestParts<S> for AuthedApp
where
    Arc<AppState>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = Arc::<AppState>::from_ref(state);

        let api_key = parts
            .headers
            .get("x-api-key")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::Unauthorized("missing X-API-Key header".into()))?;

        let app = App::find_by_api_key(api_key, &state.pool)
            .await?
            .ok_or_else(|| AppError::Unauthorized("invalid API key".into()))?;

        Ok(AuthedApp(app))
    }
}
