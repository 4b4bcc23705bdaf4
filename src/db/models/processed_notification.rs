use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePool;

use super::subscription::Platform;

/// The idempotency gate (spec §4.3): one row per (app, platform, provider
/// notification id). A unique-constraint violation on insert is how a
/// duplicate delivery is detected, not a prior SELECT — avoids a
/// check-then-act race between concurrent deliveries of the same
/// notification.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProcessedNotification {
    pub app_id: String,
    pub platform: String,
    pub notification_uuid: String,
    pub notification_type: String,
    pub processed_at: DateTime<Utc>,
}

impl ProcessedNotification {
    /// Attempts to reserve this notification id. Returns `true` if this call
    /// won the race and the caller should proceed with processing, `false`
    /// if it was already processed and the caller should short-circuit.
    pub async fn try_reserve(
        app_id: &str,
        platform: Platform,
        notification_uuid: &str,
        notification_type: &str,
        pool: &SqlitePool,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO processed_notifications (app_id, platform, notification_uuid, notification_type, processed_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(app_id)
        .bind(platform.to_string())
        .bind(notification_uuid)
        .bind(notification_type)
        .bind(Utc::now())
        .execute(pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}
