use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePool;
use uuid::Uuid;

use super::subscription::Platform;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionType {
    Purchase,
    Renewal,
    Refund,
    Cancellation,
    Upgrade,
    Downgrade,
    TrialConversion,
    BillingRetry,
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TransactionType::Purchase => "purchase",
            TransactionType::Renewal => "renewal",
            TransactionType::Refund => "refund",
            TransactionType::Cancellation => "cancellation",
            TransactionType::Upgrade => "upgrade",
            TransactionType::Downgrade => "downgrade",
            TransactionType::TrialConversion => "trial_conversion",
            TransactionType::BillingRetry => "billing_retry",
        };
        write!(f, "{s}")
    }
}

/// An immutable ledger entry for a single store-reported financial event.
/// Unlike `Subscription`, rows here are never updated after insert (spec
/// §3): a refund gets its own row, not a mutation of the original purchase.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Transaction {
    pub id: String,
    pub subscription_id: String,
    pub app_id: String,
    pub transaction_id: String,
    pub original_transaction_id: String,
    pub product_id: String,
    pub platform: String,
    pub transaction_type: String,
    pub purchase_date: DateTime<Utc>,
    pub expires_date: Option<DateTime<Utc>>,
    pub revenue_amount: Option<i64>,
    pub revenue_currency: Option<String>,
    pub is_refunded: bool,
    pub refund_date: Option<DateTime<Utc>>,
    pub raw_payload: String,
    pub created_at: DateTime<Utc>,
}

#[allow(clippy::too_many_arguments)]
impl Transaction {
    pub fn new(
        subscription_id: String,
        app_id: String,
        transaction_id: String,
        original_transaction_id: String,
        product_id: String,
        platform: Platform,
        transaction_type: TransactionType,
        purchase_date: DateTime<Utc>,
        raw_payload: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            subscription_id,
            app_id,
            transaction_id,
            original_transaction_id,
            product_id,
            platform: platform.to_string(),
            transaction_type: transaction_type.to_string(),
            purchase_date,
            expires_date: None,
            revenue_amount: None,
            revenue_currency: None,
            is_refunded: false,
            refund_date: None,
            raw_payload,
            created_at: Utc::now(),
        }
    }

    pub async fn create(&self, pool: &SqlitePool) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO transactions (
                id, subscription_id, app_id, transaction_id, original_transaction_id,
                product_id, platform, transaction_type, purchase_date, expires_date,
                revenue_amount, revenue_currency, is_refunded, refund_date,
                raw_payload, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&self.id)
        .bind(&self.subscription_id)
        .bind(&self.app_id)
        .bind(&self.transaction_id)
        .bind(&self.original_transaction_id)
        .bind(&self.product_id)
        .bind(&self.platform)
        .bind(&self.transaction_type)
        .bind(self.purchase_date)
        .bind(self.expires_date)
        .bind(self.revenue_amount)
        .bind(&self.revenue_currency)
        .bind(self.is_refunded)
        .bind(self.refund_date)
        .bind(&self.raw_payload)
        .bind(self.created_at)
        .execute(pool)
        .await?;

        Ok(())
    }

    pub async fn find_by_platform_transaction_id(
        platform: Platform,
        transaction_id: &str,
        pool: &SqlitePool,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM transactions WHERE platform = ? AND transaction_id = ?",
        )
        .bind(platform.to_string())
        .bind(transaction_id)
        .fetch_optional(pool)
        .await
    }

    pub async fn list_by_subscription(
        subscription_id: &str,
        pool: &SqlitePool,
    ) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM transactions WHERE subscription_id = ? ORDER BY purchase_date DESC",
        )
        .bind(subscription_id)
        .fetch_all(pool)
        .await
    }

    pub async fn mark_refunded(&mut self, refund_date: DateTime<Utc>, pool: &SqlitePool) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE transactions SET is_refunded = 1, refund_date = ? WHERE id = ?")
            .bind(refund_date)
            .bind(&self.id)
            .execute(pool)
            .await?;
        self.is_refunded = true;
        self.refund_date = Some(refund_date);
        Ok(())
    }
}
