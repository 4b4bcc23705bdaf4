use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePool;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Ios,
    Android,
    Stripe,
    Paddle,
    Amazon,
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Platform::Ios => "ios",
            Platform::Android => "android",
            Platform::Stripe => "stripe",
            Platform::Paddle => "paddle",
            Platform::Amazon => "amazon",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ios" => Ok(Platform::Ios),
            "android" => Ok(Platform::Android),
            "stripe" => Ok(Platform::Stripe),
            "paddle" => Ok(Platform::Paddle),
            "amazon" => Ok(Platform::Amazon),
            other => Err(format!("unknown platform: {other}")),
        }
    }
}

impl Platform {
    /// Tie-break priority used when choosing the primary subscription for
    /// reporting (spec §4.5): ios=3, android=2, stripe=1, others=0.
    pub fn priority(&self) -> i32 {
        match self {
            Platform::Ios => 3,
            Platform::Android => 2,
            Platform::Stripe => 1,
            Platform::Paddle | Platform::Amazon => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Expired,
    Cancelled,
    GracePeriod,
    Paused,
    BillingRetry,
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Expired => "expired",
            SubscriptionStatus::Cancelled => "cancelled",
            SubscriptionStatus::GracePeriod => "grace_period",
            SubscriptionStatus::Paused => "paused",
            SubscriptionStatus::BillingRetry => "billing_retry",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for SubscriptionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SubscriptionStatus::Active),
            "expired" => Ok(SubscriptionStatus::Expired),
            "cancelled" => Ok(SubscriptionStatus::Cancelled),
            "grace_period" => Ok(SubscriptionStatus::GracePeriod),
            "paused" => Ok(SubscriptionStatus::Paused),
            "billing_retry" => Ok(SubscriptionStatus::BillingRetry),
            other => Err(format!("unknown subscription status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Subscription {
    pub id: String,
    pub app_id: String,
    pub subscriber_id: String,
    pub platform: String,
    pub product_id: String,
    pub status: String,
    pub provider_subscription_id: String,
    pub purchase_date: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub grace_period_expires_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub will_renew: bool,
    pub is_sandbox: bool,
    pub is_trial: bool,
    pub price_amount: Option<i64>,
    pub price_currency: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[allow(clippy::too_many_arguments)]
impl Subscription {
    pub fn new(
        app_id: String,
        subscriber_id: String,
        platform: Platform,
        product_id: String,
        provider_subscription_id: String,
        status: SubscriptionStatus,
        purchase_date: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            app_id,
            subscriber_id,
            platform: platform.to_string(),
            product_id,
            status: status.to_string(),
            provider_subscription_id,
            purchase_date,
            expires_at: None,
            grace_period_expires_at: None,
            cancelled_at: None,
            will_renew: true,
            is_sandbox: false,
            is_trial: false,
            price_amount: None,
            price_currency: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn status(&self) -> SubscriptionStatus {
        self.status.parse().unwrap_or(SubscriptionStatus::Expired)
    }

    pub async fn create(&self, pool: &SqlitePool) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO subscriptions (
                id, app_id, subscriber_id, platform, product_id, status,
                provider_subscription_id, purchase_date, expires_at,
                grace_period_expires_at, cancelled_at, will_renew, is_sandbox,
                is_trial, price_amount, price_currency, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&self.id)
        .bind(&self.app_id)
        .bind(&self.subscriber_id)
        .bind(&self.platform)
        .bind(&self.product_id)
        .bind(&self.status)
        .bind(&self.provider_subscription_id)
        .bind(self.purchase_date)
        .bind(self.expires_at)
        .bind(self.grace_period_expires_at)
        .bind(self.cancelled_at)
        .bind(self.will_renew)
        .bind(self.is_sandbox)
        .bind(self.is_trial)
        .bind(self.price_amount)
        .bind(&self.price_currency)
        .bind(self.created_at)
        .bind(self.updated_at)
        .execute(pool)
        .await?;

        Ok(())
    }

    pub async fn find_by_id(id: &str, pool: &SqlitePool) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>("SELECT * FROM subscriptions WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_by_provider_id(
        app_id: &str,
        platform: Platform,
        provider_subscription_id: &str,
        pool: &SqlitePool,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM subscriptions
            WHERE app_id = ? AND platform = ? AND provider_subscription_id = ?
            "#,
        )
        .bind(app_id)
        .bind(platform.to_string())
        .bind(provider_subscription_id)
        .fetch_optional(pool)
        .await
    }

    pub async fn list_by_subscriber(
        subscriber_id: &str,
        pool: &SqlitePool,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM subscriptions WHERE subscriber_id = ? ORDER BY purchase_date DESC",
        )
        .bind(subscriber_id)
        .fetch_all(pool)
        .await
    }

    /// Persist an updated row using a compare-and-set on `updated_at` (spec
    /// §5's ordering guarantee): a concurrent writer that already moved
    /// `updated_at` forward wins, and this call becomes a no-op rather than
    /// clobbering a newer write.
    pub async fn save(&mut self, previous_updated_at: DateTime<Utc>, pool: &SqlitePool) -> Result<bool, sqlx::Error> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE subscriptions SET
                status = ?, expires_at = ?, grace_period_expires_at = ?,
                cancelled_at = ?, will_renew = ?, is_sandbox = ?, is_trial = ?,
                price_amount = ?, price_currency = ?, provider_subscription_id = ?,
                updated_at = ?
            WHERE id = ? AND updated_at = ?
            "#,
        )
        .bind(&self.status)
        .bind(self.expires_at)
        .bind(self.grace_period_expires_at)
        .bind(self.cancelled_at)
        .bind(self.will_renew)
        .bind(self.is_sandbox)
        .bind(self.is_trial)
        .bind(self.price_amount)
        .bind(&self.price_currency)
        .bind(&self.provider_subscription_id)
        .bind(now)
        .bind(&self.id)
        .bind(previous_updated_at)
        .execute(pool)
        .await?;

        let applied = result.rows_affected() == 1;
        if applied {
            self.updated_at = now;
        }
        Ok(applied)
    }
}
