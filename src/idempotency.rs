use sqlx::sqlite::SqlitePool;

use crate::db::models::processed_notification::ProcessedNotification;
use crate::db::models::subscription::Platform;
use crate::error::{AppError, Result};

/// Reserves a notification id before any processing happens (spec §4.3).
/// Detection is a unique-constraint insert, not a prior SELECT, so two
/// concurrent deliveries of the same notification can't both observe "not
/// yet processed" and both proceed.
pub async fn check_and_reserve(
    app_id: &str,
    platform: Platform,
    notification_uuid: &str,
    notification_type: &str,
    pool: &SqlitePool,
) -> Result<()> {
    let reserved =
        ProcessedNotification::try_reserve(app_id, platform, notification_uuid, notification_type, pool).await?;
    if !reserved {
        return Err(AppError::DuplicateNotification);
    }
    Ok(())
}
