use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use crate::db::models::subscription::{Platform, SubscriptionStatus};

/// The closed enumeration of canonical event types every provider adapter
/// maps its own vocabulary onto (spec §4.2/GLOSSARY). `Unknown` is the
/// catch-all for anything a provider sends that isn't recognized; it never
/// causes a processing error, it just preserves existing state (spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    InitialPurchase,
    Renewal,
    Cancellation,
    Expiration,
    Refund,
    BillingIssue,
    BillingRecovery,
    GracePeriodStarted,
    GracePeriodExpired,
    TrialStarted,
    TrialConverted,
    TrialEnding,
    ProductChange,
    Reactivation,
    Revocation,
    OfferRedeemed,
    PriceIncrease,
    RenewalExtended,
    Paused,
    PauseScheduled,
    PendingCancelled,
    SubscriptionUpdated,
    DisputeCreated,
    DisputeClosed,
    Unknown,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EventType::InitialPurchase => "initial_purchase",
            EventType::Renewal => "renewal",
            EventType::Cancellation => "cancellation",
            EventType::Expiration => "expiration",
            EventType::Refund => "refund",
            EventType::BillingIssue => "billing_issue",
            EventType::BillingRecovery => "billing_recovery",
            EventType::GracePeriodStarted => "grace_period_started",
            EventType::GracePeriodExpired => "grace_period_expired",
            EventType::TrialStarted => "trial_started",
            EventType::TrialConverted => "trial_converted",
            EventType::TrialEnding => "trial_ending",
            EventType::ProductChange => "product_change",
            EventType::Reactivation => "reactivation",
            EventType::Revocation => "revocation",
            EventType::OfferRedeemed => "offer_redeemed",
            EventType::PriceIncrease => "price_increase",
            EventType::RenewalExtended => "renewal_extended",
            EventType::Paused => "paused",
            EventType::PauseScheduled => "pause_scheduled",
            EventType::PendingCancelled => "pending_cancelled",
            EventType::SubscriptionUpdated => "subscription_updated",
            EventType::DisputeCreated => "dispute_created",
            EventType::DisputeClosed => "dispute_closed",
            EventType::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// The provider-agnostic shape every adapter normalizes its notification or
/// receipt verification result into (spec §4.2). `subscription_handle` is
/// whichever of {originalTransactionId, purchaseToken, stripeSubscriptionId,
/// paddleSubscriptionId, amazonReceiptId} the platform uses.
#[derive(Debug, Clone)]
pub struct StoreEvent {
    pub app_id: String,
    pub platform: Platform,
    pub notification_uuid: String,
    pub event_type: EventType,
    pub status: SubscriptionStatus,
    pub product_id: String,
    pub subscription_handle: String,
    pub purchase_date: DateTime<Utc>,
    pub expires_date: Option<DateTime<Utc>>,
    pub grace_period_expires_date: Option<DateTime<Utc>>,
    /// When the provider generated this event (Apple's `signedDate`, Stripe's
    /// `created`, Paddle's `event_time`, Amazon's SNS `Timestamp`, Google's
    /// Pub/Sub `publishTime`) rather than when we received or processed it —
    /// the basis for `cancelled_at` so that value reflects when the provider
    /// says cancellation happened, not when this request happened to arrive.
    pub event_time: DateTime<Utc>,
    pub will_renew: bool,
    pub is_sandbox: bool,
    pub is_trial: bool,
    pub revenue_amount: Option<i64>,
    pub revenue_currency: Option<String>,
    pub raw_payload: Vec<u8>,
}

/// Result of verifying a client-submitted receipt/token directly (spec
/// §4.2's `verify_receipt`), used by the `/v1/receipts` endpoint rather than
/// the provider-pushed notification path. Carries the same normalized
/// fields as `StoreEvent` but without a notification id, since no push
/// notification triggered it.
#[derive(Debug, Clone)]
pub struct CanonicalState {
    pub platform: Platform,
    pub status: SubscriptionStatus,
    pub product_id: String,
    pub subscription_handle: String,
    pub purchase_date: DateTime<Utc>,
    pub expires_date: Option<DateTime<Utc>>,
    pub grace_period_expires_date: Option<DateTime<Utc>>,
    pub will_renew: bool,
    pub is_sandbox: bool,
    pub is_trial: bool,
    pub revenue_amount: Option<i64>,
    pub revenue_currency: Option<String>,
}
