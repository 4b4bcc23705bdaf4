use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePool;
use uuid::Uuid;

/// Retry schedule from first failure, in milliseconds (spec §4.6): immediate
/// retry, then 1m, 5m, 30m, 1h, 6h, 24h. Index the pre-increment `attempts`
/// count (0 on the first failure) into this slice to get the delay before
/// the next attempt; exhausting it dead-letters the delivery.
pub const RETRY_SCHEDULE_MS: [i64; 7] = [0, 60_000, 300_000, 1_800_000, 3_600_000, 21_600_000, 86_400_000];
pub const MAX_ATTEMPTS: i64 = 7;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct WebhookDelivery {
    pub id: String,
    pub webhook_id: String,
    pub event_type: String,
    pub payload: String,
    pub response_status: Option<i64>,
    pub response_body: Option<String>,
    pub attempts: i64,
    pub delivered_at: Option<DateTime<Utc>>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WebhookDelivery {
    pub fn new(webhook_id: String, event_type: String, payload: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            webhook_id,
            event_type,
            payload,
            response_status: None,
            response_body: None,
            attempts: 0,
            delivered_at: None,
            next_retry_at: Some(now),
            created_at: now,
            updated_at: now,
        }
    }

    pub async fn create(&self, pool: &SqlitePool) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO webhook_deliveries (
                id, webhook_id, event_type, payload, response_status, response_body,
                attempts, delivered_at, next_retry_at, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&self.id)
        .bind(&self.webhook_id)
        .bind(&self.event_type)
        .bind(&self.payload)
        .bind(self.response_status)
        .bind(&self.response_body)
        .bind(self.attempts)
        .bind(self.delivered_at)
        .bind(self.next_retry_at)
        .bind(self.created_at)
        .bind(self.updated_at)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Deliveries due for an attempt: never delivered, next_retry_at in the past.
    pub async fn due_for_retry(limit: i64, pool: &SqlitePool) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>(
            r#"
            SELECT * FROM webhook_deliveries
            WHERE delivered_at IS NULL AND next_retry_at <= ?
            ORDER BY next_retry_at ASC
            LIMIT ?
            "#,
        )
        .bind(Utc::now())
        .bind(limit)
        .fetch_all(pool)
        .await
    }

    pub async fn mark_delivered(&mut self, status: i64, body: &str, pool: &SqlitePool) -> Result<(), sqlx::Error> {
        let now = Utc::now();
        sqlx::query(
            r#"
            UPDATE webhook_deliveries SET
                response_status = ?, response_body = ?, attempts = attempts + 1,
                delivered_at = ?, next_retry_at = NULL, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(status)
        .bind(body)
        .bind(now)
        .bind(now)
        .bind(&self.id)
        .execute(pool)
        .await?;

        self.attempts += 1;
        self.delivered_at = Some(now);
        self.next_retry_at = None;
        self.response_status = Some(status);
        self.response_body = Some(body.to_string());
        Ok(())
    }

    /// Records a failed attempt and schedules the next retry, or leaves
    /// `next_retry_at` as NULL (dead-lettered) once `MAX_ATTEMPTS` is reached.
    pub async fn mark_failed(
        &mut self,
        status: Option<i64>,
        body: Option<&str>,
        pool: &SqlitePool,
    ) -> Result<(), sqlx::Error> {
        let now = Utc::now();
        let next_retry_at = RETRY_SCHEDULE_MS
            .get(self.attempts as usize)
            .map(|delay_ms| now + chrono::Duration::milliseconds(*delay_ms));
        let new_attempts = self.attempts + 1;

        sqlx::query(
            r#"
            UPDATE webhook_deliveries SET
                response_status = ?, response_body = ?, attempts = ?,
                next_retry_at = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(status)
        .bind(body)
        .bind(new_attempts)
        .bind(next_retry_at)
        .bind(now)
        .bind(&self.id)
        .execute(pool)
        .await?;

        self.attempts = new_attempts;
        self.next_retry_at = next_retry_at;
        self.response_status = status;
        self.response_body = body.map(|s| s.to_string());
        Ok(())
    }

    pub fn is_dead_lettered(&self) -> bool {
        self.delivered_at.is_none() && self.next_retry_at.is_none() && self.attempts >= MAX_ATTEMPTS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Scenario S4: delays after failures 1-4 must be 0, 60s, 5m, 30m.
    #[test]
    fn retry_schedule_indexes_pre_increment_attempts() {
        let delays: Vec<i64> = (0..4).map(|attempts| RETRY_SCHEDULE_MS[attempts]).collect();
        assert_eq!(delays, vec![0, 60_000, 300_000, 1_800_000]);
    }
}
