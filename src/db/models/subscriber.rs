use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePool;
use uuid::Uuid;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Subscriber {
    pub id: String,
    pub app_id: String,
    pub app_user_id: String,
    pub attributes: String, // JSON object
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

impl Subscriber {
    pub fn new(app_id: String, app_user_id: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            app_id,
            app_user_id,
            attributes: "{}".to_string(),
            first_seen_at: now,
            last_seen_at: now,
        }
    }

    pub async fn create(&self, pool: &SqlitePool) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO subscribers (id, app_id, app_user_id, attributes, first_seen_at, last_seen_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&self.id)
        .bind(&self.app_id)
        .bind(&self.app_user_id)
        .bind(&self.attributes)
        .bind(self.first_seen_at)
        .bind(self.last_seen_at)
        .execute(pool)
        .await?;

        Ok(())
    }

    pub async fn find_by_id(id: &str, pool: &SqlitePool) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>("SELECT * FROM subscribers WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_by_app_user_id(
        app_id: &str,
        app_user_id: &str,
        pool: &SqlitePool,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>("SELECT * FROM subscribers WHERE app_id = ? AND app_user_id = ?")
            .bind(app_id)
            .bind(app_user_id)
            .fetch_optional(pool)
            .await
    }

    /// First-seen-or-create, used by receipt/notification ingestion when an
    /// app_user_id has never been identified before (spec §3 lifecycle).
    pub async fn find_or_create(
        app_id: &str,
        app_user_id: &str,
        pool: &SqlitePool,
    ) -> Result<Self, sqlx::Error> {
        if let Some(existing) = Self::find_by_app_user_id(app_id, app_user_id, pool).await? {
            return Ok(existing);
        }
        let subscriber = Self::new(app_id.to_string(), app_user_id.to_string());
        subscriber.create(pool).await?;
        Ok(subscriber)
    }

    pub async fn touch_last_seen(&mut self, pool: &SqlitePool) -> Result<(), sqlx::Error> {
        let now = Utc::now();
        sqlx::query("UPDATE subscribers SET last_seen_at = ? WHERE id = ?")
            .bind(now)
            .bind(&self.id)
            .execute(pool)
            .await?;
        self.last_seen_at = now;
        Ok(())
    }

    /// GDPR erase. Cascades to subscriptions and transactions (spec §3
    /// ownership rule); foreign keys are enforced with `PRAGMA foreign_keys`
    /// so child rows must be removed first.
    pub async fn delete_cascade(&self, pool: &SqlitePool) -> Result<(), sqlx::Error> {
        let mut tx = pool.begin().await?;
        sqlx::query(
            r#"
            DELETE FROM transactions WHERE subscription_id IN (
                SELECT id FROM subscriptions WHERE subscriber_id = ?
            )
            "#,
        )
        .bind(&self.id)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM subscriptions WHERE subscriber_id = ?")
            .bind(&self.id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM subscribers WHERE id = ?")
            .bind(&self.id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}
