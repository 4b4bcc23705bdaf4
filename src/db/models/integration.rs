use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePool;
use uuid::Uuid;

/// One of the supported analytics/marketing fan-out targets (spec §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrationType {
    Amplitude,
    Mixpanel,
    Segment,
    Braze,
    AppsFlyer,
    Adjust,
    Slack,
    Generic,
}

impl std::fmt::Display for IntegrationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            IntegrationType::Amplitude => "amplitude",
            IntegrationType::Mixpanel => "mixpanel",
            IntegrationType::Segment => "segment",
            IntegrationType::Braze => "braze",
            IntegrationType::AppsFlyer => "appsflyer",
            IntegrationType::Adjust => "adjust",
            IntegrationType::Slack => "slack",
            IntegrationType::Generic => "generic",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for IntegrationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "amplitude" => Ok(IntegrationType::Amplitude),
            "mixpanel" => Ok(IntegrationType::Mixpanel),
            "segment" => Ok(IntegrationType::Segment),
            "braze" => Ok(IntegrationType::Braze),
            "appsflyer" => Ok(IntegrationType::AppsFlyer),
            "adjust" => Ok(IntegrationType::Adjust),
            "slack" => Ok(IntegrationType::Slack),
            "generic" => Ok(IntegrationType::Generic),
            other => Err(format!("unknown integration type: {other}")),
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Integration {
    pub id: String,
    pub app_id: String,
    pub integration_type: String,
    pub name: String,
    pub config: String, // JSON object, shape depends on integration_type
    pub enabled: bool,
    pub event_filter: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Integration {
    pub fn new(app_id: String, integration_type: IntegrationType, name: String, config: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            app_id,
            integration_type: integration_type.to_string(),
            name,
            config,
            enabled: true,
            event_filter: "*".to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn kind(&self) -> Option<IntegrationType> {
        self.integration_type.parse().ok()
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
            INSERT INTO integrations (
                id, app_id, integration_type, name, config, enabled,
                event_filter, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&self.id)
        .bind(&self.app_id)
        .bind(&self.integration_type)
        .bind(&self.name)
        .bind(&self.config)
        .bind(self.enabled)
        .bind(&self.event_filter)
        .bind(self.created_at)
        .bind(self.updated_at)
        .execute(pool)
        .await?;

        Ok(())
    }

    pub async fn list_enabled_for_app(app_id: &str, pool: &SqlitePool) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>("SELECT * FROM integrations WHERE app_id = ? AND enabled = 1")
            .bind(app_id)
            .fetch_all(pool)
            .await
    }
}

/// Audit row recording whether a single fan-out attempt to one integration
/// succeeded (spec §4.7): one insert per integration per event, independent
/// of the others, so one sink's outage never blocks or retries another's.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct IntegrationDelivery {
    pub id: String,
    pub integration_id: String,
    pub event_type: String,
    pub success: bool,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl IntegrationDelivery {
    pub fn new(integration_id: String, event_type: String, success: bool, error_message: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            integration_id,
            event_type,
            success,
            error_message,
            created_at: Utc::now(),
        }
    }

    pub async fn create(&self, pool: &SqlitePool) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO integration_deliveries (id, integration_id, event_type, success, error_message, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&self.id)
        .bind(&self.integration_id)
        .bind(&self.event_type)
        .bind(self.success)
        .bind(&self.error_message)
        .bind(self.created_at)
        .execute(pool)
        .await?;

        Ok(())
    }
}
