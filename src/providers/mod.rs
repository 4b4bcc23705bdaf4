pub mod amazon;
pub mod apple;
pub mod google;
pub mod paddle;
pub mod stripe;
pub mod types;

use async_trait::async_trait;
use crate::db::models::App;
use crate::error::Result;
use types::{CanonicalState, StoreEvent};

/// Capability set every provider adapter implements (spec §9's redesign
/// note: a closed tagged union rather than duck-typed per-module
/// functions). Dispatch on `Platform` picks the concrete adapter; callers
/// never match on provider name themselves.
#[async_trait]
pub trait ProviderAdapter {
    /// Verifies a client-submitted receipt/token directly against the
    /// provider (used by the `/v1/receipts` endpoint).
    async fn verify_receipt(&self, app: &App, handle: &str) -> Result<CanonicalState>;

    /// Verifies a provider-pushed notification's authenticity and decodes
    /// it into the canonical event shape.
    async fn verify_notification(&self, app: &App, raw_body: &[u8], headers: &axum::http::HeaderMap) -> Result<StoreEvent>;
}
