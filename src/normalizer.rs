use chrono::Utc;

use crate::db::models::subscription::{Subscription, SubscriptionStatus};
use crate::db::models::transaction::{Transaction, TransactionType};
use crate::providers::types::{EventType, StoreEvent};

/// Applies a `StoreEvent` to whatever subscription row currently exists
/// (`None` for a first-ever purchase) and returns the fields the caller
/// should persist: the new subscription status/flags and the kind of
/// ledger transaction to append (spec §4.4's transition table).
///
/// Writes by the caller must happen in order: update subscription, append
/// transaction, mark notification processed (spec §4.4) — re-delivery after
/// a partial write replays idempotently because the transaction id is
/// unique and the notification uuid is stable.
pub struct Transition {
    pub status: SubscriptionStatus,
    pub will_renew: bool,
    pub is_trial: bool,
    pub expires_at: Option<chrono::DateTime<Utc>>,
    pub grace_period_expires_at: Option<chrono::DateTime<Utc>>,
    pub cancelled_at: Option<chrono::DateTime<Utc>>,
    pub transaction_type: TransactionType,
    pub is_refund: bool,
}

pub fn apply(event: &StoreEvent, existing: Option<&Subscription>) -> Transition {
    let previous_cancelled_at = existing.and_then(|s| s.cancelled_at);

    // Most event types map to a fixed status per the transition table
    // regardless of what the adapter observed. The "status preserved"
    // category (generic updates, disputes, unknown types) instead defers to
    // `event.status` — the adapter's own authoritative read, which for
    // Google is a v2 API re-fetch and for Stripe is the embedded
    // subscription object (spec §4.4's tie-break rule); for Apple, where no
    // re-read happens, the adapter already derives `event.status` from the
    // notification itself, so this still reduces to the previous behavior.
    let (status, transaction_type, is_refund) = match event.event_type {
        EventType::InitialPurchase => (SubscriptionStatus::Active, TransactionType::Purchase, false),
        EventType::Renewal | EventType::BillingRecovery | EventType::Reactivation | EventType::RenewalExtended => {
            (SubscriptionStatus::Active, TransactionType::Renewal, false)
        }
        EventType::TrialStarted => (SubscriptionStatus::Active, TransactionType::Purchase, false),
        EventType::TrialConverted => (SubscriptionStatus::Active, TransactionType::TrialConversion, false),
        EventType::Cancellation => (SubscriptionStatus::Active, TransactionType::Cancellation, false),
        EventType::BillingIssue => (SubscriptionStatus::BillingRetry, TransactionType::BillingRetry, false),
        EventType::GracePeriodStarted => (SubscriptionStatus::GracePeriod, TransactionType::BillingRetry, false),
        EventType::GracePeriodExpired | EventType::Expiration => (SubscriptionStatus::Expired, TransactionType::Renewal, false),
        EventType::Refund | EventType::Revocation => (SubscriptionStatus::Cancelled, TransactionType::Refund, true),
        EventType::Paused => (SubscriptionStatus::Paused, TransactionType::Cancellation, false),
        EventType::PriceIncrease
        | EventType::ProductChange
        | EventType::SubscriptionUpdated
        | EventType::OfferRedeemed
        | EventType::TrialEnding
        | EventType::DisputeCreated
        | EventType::DisputeClosed
        | EventType::PauseScheduled
        | EventType::PendingCancelled
        | EventType::Unknown => (event.status, TransactionType::Renewal, false),
    };

    // `cancelled_at` records the provider's own event time, not wall-clock
    // receipt time. A `SubscriptionUpdated` that flips `will_renew` to false
    // (Stripe's `cancel_at_period_end=true`) is a cancellation-in-effect even
    // though the status doesn't change until the period actually elapses.
    let cancelled_at = match event.event_type {
        EventType::Cancellation | EventType::Refund | EventType::Revocation => Some(event.event_time),
        EventType::SubscriptionUpdated if !event.will_renew => Some(event.event_time),
        _ => previous_cancelled_at,
    };

    let will_renew = match event.event_type {
        EventType::Cancellation | EventType::Refund | EventType::Revocation | EventType::Paused => false,
        _ => event.will_renew,
    };

    let is_trial = match event.event_type {
        EventType::TrialStarted => true,
        EventType::TrialConverted => false,
        _ => existing.map(|s| s.is_trial).unwrap_or(event.is_trial),
    };

    Transition {
        status,
        will_renew,
        is_trial,
        expires_at: event.expires_date,
        grace_period_expires_at: event.grace_period_expires_date,
        cancelled_at,
        transaction_type,
        is_refund,
    }
}

/// Builds the subscription row to persist (fresh insert on first sight of a
/// `subscription_handle`, in-place update otherwise) from the transition.
pub fn apply_to_subscription(subscription: &mut Subscription, transition: &Transition, event: &StoreEvent) {
    subscription.status = transition.status.to_string();
    subscription.will_renew = transition.will_renew;
    subscription.is_trial = transition.is_trial;
    subscription.expires_at = transition.expires_at;
    subscription.grace_period_expires_at = transition.grace_period_expires_at;
    subscription.cancelled_at = transition.cancelled_at;
    subscription.is_sandbox = event.is_sandbox;
    if let Some(amount) = event.revenue_amount {
        subscription.price_amount = Some(amount);
    }
    if let Some(currency) = &event.revenue_currency {
        subscription.price_currency = Some(currency.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::subscription::Platform;
    use chrono::Utc;

    fn base_event(event_type: EventType, status: SubscriptionStatus) -> StoreEvent {
        StoreEvent {
            app_id: "app_1".into(),
            platform: Platform::Ios,
            notification_uuid: "uuid_1".into(),
            event_type,
            status,
            product_id: "pro_monthly".into(),
            subscription_handle: "txn_1".into(),
            purchase_date: Utc::now(),
            expires_date: Some(Utc::now() + chrono::Duration::days(30)),
            grace_period_expires_date: None,
            event_time: Utc::now(),
            will_renew: true,
            is_sandbox: false,
            is_trial: false,
            revenue_amount: Some(999),
            revenue_currency: Some("USD".into()),
            raw_payload: vec![],
        }
    }

    #[test]
    fn initial_purchase_activates() {
        let event = base_event(EventType::InitialPurchase, SubscriptionStatus::Active);
        let transition = apply(&event, None);
        assert_eq!(transition.status, SubscriptionStatus::Active);
        assert!(transition.will_renew);
    }

    #[test]
    fn cancellation_preserves_active_until_expiry() {
        let event = base_event(EventType::Cancellation, SubscriptionStatus::Active);
        let transition = apply(&event, None);
        assert_eq!(transition.status, SubscriptionStatus::Active);
        assert!(!transition.will_renew);
        assert!(transition.cancelled_at.is_some());
    }

    #[test]
    fn refund_marks_cancelled_and_flags_transaction() {
        let event = base_event(EventType::Refund, SubscriptionStatus::Cancelled);
        let transition = apply(&event, None);
        assert_eq!(transition.status, SubscriptionStatus::Cancelled);
        assert!(transition.is_refund);
    }

    #[test]
    fn billing_issue_then_grace_period() {
        let billing_issue = base_event(EventType::BillingIssue, SubscriptionStatus::Active);
        let t1 = apply(&billing_issue, None);
        assert_eq!(t1.status, SubscriptionStatus::BillingRetry);

        let grace = base_event(EventType::GracePeriodStarted, SubscriptionStatus::Active);
        let t2 = apply(&grace, None);
        assert_eq!(t2.status, SubscriptionStatus::GracePeriod);
    }

    #[test]
    fn subscription_updated_with_cancel_at_period_end_records_cancelled_at() {
        let mut event = base_event(EventType::SubscriptionUpdated, SubscriptionStatus::Active);
        event.will_renew = false;
        let transition = apply(&event, None);
        assert_eq!(transition.cancelled_at, Some(event.event_time));
    }

    #[test]
    fn subscription_updated_without_cancel_preserves_previous_cancelled_at() {
        let event = base_event(EventType::SubscriptionUpdated, SubscriptionStatus::Active);
        assert!(event.will_renew);
        let transition = apply(&event, None);
        assert_eq!(transition.cancelled_at, None);
    }

    #[test]
    fn unknown_event_defers_to_adapter_authoritative_status() {
        let existing = Subscription::new(
            "app_1".into(),
            "sub_1".into(),
            Platform::Ios,
            "pro_monthly".into(),
            "txn_1".into(),
            SubscriptionStatus::GracePeriod,
            Utc::now(),
        );
        let event = base_event(EventType::Unknown, SubscriptionStatus::BillingRetry);
        let transition = apply(&event, Some(&existing));
        assert_eq!(transition.status, SubscriptionStatus::BillingRetry);
    }
}
