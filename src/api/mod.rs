pub mod auth;
pub mod health;
pub mod notifications;
pub mod receipts;
pub mod subscribers;

use axum::routing::{delete, get, post};
use axum::Router;
use reqwest::Client;
use sqlx::sqlite::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::providers::amazon::AmazonAdapter;
use crate::providers::apple::AppleAdapter;
use crate::providers::google::GoogleAdapter;
use crate::providers::paddle::PaddleAdapter;
use crate::providers::stripe::StripeAdapter;

/// Shared state handed to every handler. The provider adapters carry their
/// own per-tenant credential caches (Apple JWTs, Google OAuth tokens) behind
/// an internal lock, so they're constructed once here and shared via `Arc`
/// rather than rebuilt per request.
pub struct AppState {
    pub pool: SqlitePool,
    pub http: Client,
    pub apple: AppleAdapter,
    pub google: GoogleAdapter,
    pub stripe: StripeAdapter,
    pub paddle: PaddleAdapter,
    pub amazon: AmazonAdapter,
}

impl AppState {
    pub fn new(pool: SqlitePool, config: &Config) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.provider_timeout_secs))
            .build()
            .expect("failed to build reqwest client");

        Self {
            apple: AppleAdapter::new(http.clone()),
            google: GoogleAdapter::new(http.clone()),
            stripe: StripeAdapter::new(http.clone()),
            paddle: PaddleAdapter::new(http.clone()),
            amazon: AmazonAdapter::new(http.clone()),
            http,
            pool,
        }
    }
}

/// Builds the full route table (spec §6). Receipts and subscriber routes
/// authenticate via `AuthedApp` (the `X-API-Key` header); notification
/// routes resolve their tenant from the path or payload instead, since
/// providers don't send our API key back to us.
pub fn routes(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/v1/healthz", get(health::liveness))
        .route("/v1/readyz", get(health::readiness))
        .route("/v1/receipts", post(receipts::submit_receipt))
        .route("/v1/subscribers/:app_user_id", get(subscribers::get_subscriber))
        .route("/v1/subscribers/:app_user_id", delete(subscribers::delete_subscriber))
        .route("/v1/notifications/apple/:app_id", post(notifications::handle_apple))
        .route("/v1/notifications/google/:app_id", post(notifications::handle_google))
        .route("/v1/notifications/stripe/:app_id", post(notifications::handle_stripe))
        .route("/v1/notifications/amazon/:app_id", post(notifications::handle_amazon))
        .route("/v1/notifications/paddle", post(notifications::handle_paddle))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
