use chrono::{DateTime, Utc};
use rand::RngCore;
use sqlx::sqlite::SqlitePool;
use uuid::Uuid;

/// A tenant-configured HTTP endpoint that receives signed `DomainEvent`
/// payloads (spec §4.6). `event_filter` is either `"*"` or a comma-separated
/// allowlist of event type strings, matching the teacher's `event_filter`
/// convention on integrations.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Webhook {
    pub id: String,
    pub app_id: String,
    pub url: String,
    pub secret: String,
    pub event_filter: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Webhook {
    pub fn new(app_id: String, url: String) -> Self {
        let now = Utc::now();
        let mut secret_bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut secret_bytes);
        Self {
            id: Uuid::new_v4().to_string(),
            app_id,
            url,
            secret: hex::encode(secret_bytes),
            event_filter: "*".to_string(),
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn accepts(&self, event_type: &str) -> bool {
        if self.event_filter == "*" {
            return true;
        }
        self.event_filter.split(',').any(|t| t.trim() == event_type)
    }

    pub async fn create(&self, pool: &SqlitePool) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO webhooks (id, app_id, url, secret, event_filter, active, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&self.id)
        .bind(&self.app_id)
        .bind(&self.url)
        .bind(&self.secret)
        .bind(&self.event_filter)
        .bind(self.active)
        .bind(self.created_at)
        .bind(self.updated_at)
        .execute(pool)
        .await?;

        Ok(())
    }

    pub async fn find_by_id(id: &str, pool: &SqlitePool) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>("SELECT * FROM webhooks WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn list_active_for_app(app_id: &str, pool: &SqlitePool) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>("SELECT * FROM webhooks WHERE app_id = ? AND active = 1")
            .bind(app_id)
            .fetch_all(pool)
            .await
    }
}
