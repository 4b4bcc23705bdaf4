use serde_json::Value;
use sqlx::sqlite::SqlitePool;

use crate::db::models::subscriber::Subscriber;
use crate::db::models::subscription::{Platform, Subscription};
use crate::db::models::transaction::Transaction;
use crate::db::models::App;
use crate::entitlements::{self, EntitlementResult};
use crate::error::Result;
use crate::events::{DomainEvent, DomainEventData, DomainEventSubscription, DomainEventTransaction};
use crate::integrations;
use crate::normalizer;
use crate::providers::types::StoreEvent;
use crate::webhooks;
use reqwest::Client;

/// Applies a normalized `StoreEvent` to the subscription/transaction graph
/// for `app_user_id`, recomputes entitlements, and fans the resulting
/// `DomainEvent` out to webhooks and integrations (spec §4.4/§4.5/§4.6/§4.7
/// chained in the order the spec's writes require: subscription, then
/// transaction, then downstream fan-out).
pub async fn apply_store_event(
    app: &App,
    event: &StoreEvent,
    app_user_id: &str,
    http: &Client,
    pool: &SqlitePool,
) -> Result<EntitlementResult> {
    let mut subscriber = Subscriber::find_or_create(&app.id, app_user_id, pool).await?;
    subscriber.touch_last_seen(pool).await?;

    let existing = Subscription::find_by_provider_id(&app.id, event.platform, &event.subscription_handle, pool).await?;
    let transition = normalizer::apply(event, existing.as_ref());
    let is_new = existing.is_none();

    let mut subscription = existing.unwrap_or_else(|| {
        Subscription::new(
            app.id.clone(),
            subscriber.id.clone(),
            event.platform,
            event.product_id.clone(),
            event.subscription_handle.clone(),
            transition.status,
            event.purchase_date,
        )
    });
    let previous_updated_at = subscription.updated_at;
    normalizer::apply_to_subscription(&mut subscription, &transition, event);

    if is_new {
        subscription.create(pool).await?;
    } else if !subscription.save(previous_updated_at, pool).await? {
        tracing::warn!(subscription_id = %subscription.id, "subscription row changed concurrently, skipping stale write");
    }

    let revenue_amount = if transition.is_refund {
        event.revenue_amount.map(|a| -a.abs())
    } else {
        event.revenue_amount
    };

    let transaction = {
        let mut t = Transaction::new(
            subscription.id.clone(),
            app.id.clone(),
            event.notification_uuid.clone(),
            event.subscription_handle.clone(),
            event.product_id.clone(),
            event.platform,
            transition.transaction_type,
            event.purchase_date,
            String::from_utf8_lossy(&event.raw_payload).to_string(),
        );
        t.expires_date = event.expires_date;
        t.revenue_amount = revenue_amount;
        t.revenue_currency = event.revenue_currency.clone();
        t.is_refunded = transition.is_refund;
        if transition.is_refund {
            t.refund_date = Some(chrono::Utc::now());
        }
        t
    };
    transaction.create(pool).await?;

    let subscriptions = Subscription::list_by_subscriber(&subscriber.id, pool).await?;
    let result = entitlements::calculate(&app.id, subscriptions, pool).await?;

    let domain_event = build_domain_event(event, &subscriber.id, app_user_id, &subscription, &transaction, &result);
    dispatch_fan_out(&app.id, &domain_event, http, pool).await;

    Ok(result)
}

fn build_domain_event(
    event: &StoreEvent,
    subscriber_id: &str,
    app_user_id: &str,
    subscription: &Subscription,
    transaction: &Transaction,
    entitlements: &EntitlementResult,
) -> DomainEvent {
    let data = DomainEventData {
        app_user_id: app_user_id.to_string(),
        subscriber_id: subscriber_id.to_string(),
        subscription: Some(DomainEventSubscription {
            id: subscription.id.clone(),
            product_id: subscription.product_id.clone(),
            platform: subscription.platform.clone(),
            status: subscription.status.clone(),
            expires_at: subscription.expires_at,
        }),
        transaction: Some(DomainEventTransaction {
            id: transaction.id.clone(),
            amount: transaction.revenue_amount,
            currency: transaction.revenue_currency.clone(),
        }),
        entitlements: Some(entitlements_to_value(entitlements)),
    };

    DomainEvent::new(event.event_type, data)
}

fn entitlements_to_value(result: &EntitlementResult) -> Value {
    entitlements::entitlements_to_bool_map(&result.entitlements)
}

/// Webhook dispatch and integration fan-out never propagate failures back
/// into the ingestion response (spec §4.6/§4.7: logged, not retried inline,
/// never block the pipeline).
async fn dispatch_fan_out(app_id: &str, event: &DomainEvent, http: &Client, pool: &SqlitePool) {
    if let Err(e) = webhooks::dispatch(app_id, event, http, pool).await {
        tracing::error!(app_id, error = %e, "webhook dispatch failed");
    }
    if let Err(e) = integrations::fan_out(app_id, event, http, pool).await {
        tracing::error!(app_id, error = %e, "integration fan-out failed");
    }
}

/// Resolves which subscriber a notification belongs to when the provider
/// payload carries no `app_user_id` itself (true for Apple/Google/Stripe/
/// Amazon pushes): prefer the subscriber already linked to this
/// `(app, platform, subscription_handle)`, falling back to a handle-derived
/// placeholder identity that a later client-initiated receipt sync links to
/// the real `app_user_id` once the SDK checks in.
pub async fn resolve_app_user_id(app_id: &str, platform: Platform, subscription_handle: &str, pool: &SqlitePool) -> Result<String> {
    if let Some(existing) = Subscription::find_by_provider_id(app_id, platform, subscription_handle, pool).await? {
        if let Some(subscriber) = Subscriber::find_by_id(&existing.subscriber_id, pool).await? {
            return Ok(subscriber.app_user_id);
        }
    }
    Ok(format!("unlinked:{platform}:{subscription_handle}"))
}
