use chrono::Utc;
use serde_json::Value;
use sqlx::sqlite::SqlitePool;
use std::collections::HashMap;

use crate::db::models::entitlement::ProductEntitlement;
use crate::db::models::subscription::{Subscription, SubscriptionStatus};
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct ResolvedEntitlement {
    pub identifier: String,
    pub is_active: bool,
    pub expires_at: Option<chrono::DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct EntitlementResult {
    pub subscriptions: Vec<Subscription>,
    pub entitlements: HashMap<String, ResolvedEntitlement>,
    pub primary_subscription: Option<Subscription>,
}

/// A subscription grants iff it's `{active, grace_period}` and not yet
/// expired, or `billing_retry` and still inside its grace window (spec
/// §4.5). Paused, cancelled, and expired never grant. Boundary: `now ==
/// expires_at` is expired (strict greater-than only).
fn is_currently_granting(subscription: &Subscription, now: chrono::DateTime<Utc>) -> bool {
    match subscription.status() {
        SubscriptionStatus::Active | SubscriptionStatus::GracePeriod => {
            subscription.expires_at.map(|exp| now < exp).unwrap_or(true)
        }
        SubscriptionStatus::BillingRetry => subscription
            .grace_period_expires_at
            .map(|exp| now < exp)
            .unwrap_or(true),
        SubscriptionStatus::Paused | SubscriptionStatus::Cancelled | SubscriptionStatus::Expired => false,
    }
}

/// Computes every entitlement a subscriber currently holds, unioned across
/// granting subscriptions. For an entitlement granted by more than one
/// subscription, the persisted expiry is the maximum across contributors
/// and `is_active=true` beats `false` (spec §4.5).
pub async fn calculate(app_id: &str, subscriptions: Vec<Subscription>, pool: &SqlitePool) -> Result<EntitlementResult> {
    let now = Utc::now();
    let mut entitlements: HashMap<String, ResolvedEntitlement> = HashMap::new();

    for subscription in &subscriptions {
        if !is_currently_granting(subscription, now) {
            continue;
        }

        let identifiers = ProductEntitlement::identifiers_for_product(app_id, &subscription.product_id, pool).await?;
        let identifiers = if identifiers.is_empty() {
            vec![subscription.product_id.clone()]
        } else {
            identifiers
        };

        for identifier in identifiers {
            match entitlements.get_mut(&identifier) {
                Some(entry) => {
                    entry.expires_at = max_expiry(entry.expires_at, subscription.expires_at);
                }
                None => {
                    entitlements.insert(
                        identifier.clone(),
                        ResolvedEntitlement {
                            identifier,
                            is_active: true,
                            expires_at: subscription.expires_at,
                        },
                    );
                }
            }
        }
    }

    let primary_subscription = subscriptions
        .iter()
        .filter(|s| is_currently_granting(s, now))
        .max_by(|a, b| {
            a.price_amount
                .cmp(&b.price_amount)
                .then_with(|| a.expires_at.cmp(&b.expires_at))
                .then_with(|| platform_priority(a).cmp(&platform_priority(b)))
        })
        .cloned();

    Ok(EntitlementResult {
        subscriptions,
        entitlements,
        primary_subscription,
    })
}

/// A null expiry (lifetime access) outranks any finite one.
fn max_expiry(a: Option<chrono::DateTime<Utc>>, b: Option<chrono::DateTime<Utc>>) -> Option<chrono::DateTime<Utc>> {
    match (a, b) {
        (None, _) | (_, None) => None,
        (Some(a), Some(b)) => Some(a.max(b)),
    }
}

fn platform_priority(subscription: &Subscription) -> i32 {
    subscription.platform.parse::<crate::db::models::subscription::Platform>().map(|p| p.priority()).unwrap_or(0)
}

/// Rich shape for `GET /v1/subscribers`: `{ <id>: {is_active, expires_date} }`.
pub fn entitlements_to_json(entitlements: &HashMap<String, ResolvedEntitlement>) -> Value {
    let map: serde_json::Map<String, Value> = entitlements
        .iter()
        .map(|(id, e)| (id.clone(), serde_json::json!({"is_active": e.is_active, "expires_date": e.expires_at})))
        .collect();
    Value::Object(map)
}

/// Flat shape for the outbound webhook/integration payload (spec §4.6):
/// `{ <id>: <bool> }`, dropping expiry detail the event consumer doesn't get.
pub fn entitlements_to_bool_map(entitlements: &HashMap<String, ResolvedEntitlement>) -> Value {
    let map: serde_json::Map<String, Value> =
        entitlements.iter().map(|(id, e)| (id.clone(), Value::Bool(e.is_active))).collect();
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::subscription::Platform;

    fn sub(status: SubscriptionStatus, expires_at: Option<chrono::DateTime<Utc>>) -> Subscription {
        let mut s = Subscription::new(
            "app_1".into(),
            "subscriber_1".into(),
            Platform::Ios,
            "pro_monthly".into(),
            "txn_1".into(),
            status,
            Utc::now(),
        );
        s.status = status.to_string();
        s.expires_at = expires_at;
        s
    }

    #[test]
    fn active_with_future_expiry_grants() {
        let s = sub(SubscriptionStatus::Active, Some(Utc::now() + chrono::Duration::days(1)));
        assert!(is_currently_granting(&s, Utc::now()));
    }

    #[test]
    fn expires_at_equal_to_now_is_expired() {
        let now = Utc::now();
        let s = sub(SubscriptionStatus::Active, Some(now));
        assert!(!is_currently_granting(&s, now));
    }

    #[test]
    fn one_ms_before_expiry_is_active() {
        let now = Utc::now();
        let s = sub(SubscriptionStatus::Active, Some(now + chrono::Duration::milliseconds(1)));
        assert!(is_currently_granting(&s, now));
    }

    #[test]
    fn paused_never_grants() {
        let s = sub(SubscriptionStatus::Paused, None);
        assert!(!is_currently_granting(&s, Utc::now()));
    }

    #[test]
    fn billing_retry_grants_within_grace_window() {
        let mut s = sub(SubscriptionStatus::BillingRetry, None);
        s.grace_period_expires_at = Some(Utc::now() + chrono::Duration::days(1));
        assert!(is_currently_granting(&s, Utc::now()));
    }

    #[test]
    fn bool_map_drops_expiry_detail() {
        let mut entitlements = HashMap::new();
        entitlements.insert(
            "pro".to_string(),
            ResolvedEntitlement {
                identifier: "pro".to_string(),
                is_active: true,
                expires_at: Some(Utc::now()),
            },
        );
        let value = entitlements_to_bool_map(&entitlements);
        assert_eq!(value, serde_json::json!({"pro": true}));
    }
}
