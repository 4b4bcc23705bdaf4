use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePool;
use uuid::Uuid;

/// Per-provider credential blobs, stored as JSON on the `apps` row (spec §3).
/// At most one config per provider — enforced by the single nullable column
/// per provider rather than a child table, since an app never holds two
/// configs for the same platform.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppleConfig {
    pub key_id: String,
    pub issuer_id: String,
    pub bundle_id: String,
    pub private_key_pem: String,
    /// SHA-256 fingerprints (hex) of the Apple root certificates this
    /// tenant trusts for x5c chain validation. Apple publishes these on its
    /// certificate authority page; operators provision them at app-creation
    /// time rather than the gateway hardcoding a value that could go stale
    /// across a root rotation.
    #[serde(default)]
    pub pinned_root_fingerprints: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GoogleConfig {
    pub package_name: String,
    pub service_account_email: String,
    pub service_private_key_pem: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PaddleConfig {
    pub vendor_id: String,
    pub api_key: String,
    pub public_key_pem: String,
    pub sandbox: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AmazonConfig {
    pub app_id: String,
    pub shared_secret: String,
    pub sandbox: bool,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct App {
    pub id: String,
    pub name: String,
    pub api_key: String,
    pub apple_config: Option<String>,
    pub google_config: Option<String>,
    pub stripe_config: Option<String>,
    pub paddle_config: Option<String>,
    pub amazon_config: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl App {
    pub fn new(name: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name,
            api_key: format!("pc_{}", Uuid::new_v4().simple()),
            apple_config: None,
            google_config: None,
            stripe_config: None,
            paddle_config: None,
            amazon_config: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn apple(&self) -> Option<AppleConfig> {
        self.apple_config.as_deref().and_then(|s| serde_json::from_str(s).ok())
    }

    pub fn google(&self) -> Option<GoogleConfig> {
        self.google_config.as_deref().and_then(|s| serde_json::from_str(s).ok())
    }

    pub fn stripe(&self) -> Option<StripeConfig> {
        self.stripe_config.as_deref().and_then(|s| serde_json::from_str(s).ok())
    }

    pub fn paddle(&self) -> Option<PaddleConfig> {
        self.paddle_config.as_deref().and_then(|s| serde_json::from_str(s).ok())
    }

    pub fn amazon(&self) -> Option<AmazonConfig> {
        self.amazon_config.as_deref().and_then(|s| serde_json::from_str(s).ok())
    }

    pub async fn create(&self, pool: &SqlitePool) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO apps (
                id, name, api_key, apple_config, google_config, stripe_config,
                paddle_config, amazon_config, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&self.id)
        .bind(&self.name)
        .bind(&self.api_key)
        .bind(&self.apple_config)
        .bind(&self.google_config)
        .bind(&self.stripe_config)
        .bind(&self.paddle_config)
        .bind(&self.amazon_config)
        .bind(self.created_at)
        .bind(self.updated_at)
        .execute(pool)
        .await?;

        Ok(())
    }

    pub async fn find_by_id(id: &str, pool: &SqlitePool) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>("SELECT * FROM apps WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_by_api_key(api_key: &str, pool: &SqlitePool) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>("SELECT * FROM apps WHERE api_key = ?")
            .bind(api_key)
            .fetch_optional(pool)
            .await
    }

    pub async fn set_provider_config(
        &mut self,
        column: &str,
        json: &str,
        pool: &SqlitePool,
    ) -> Result<(), sqlx::Error> {
        let query = format!("UPDATE apps SET {column} = ?, updated_at = ? WHERE id = ?");
        let now = Utc::now();
        sqlx::query(&query)
            .bind(json)
            .bind(now)
            .bind(&self.id)
            .execute(pool)
            .await?;
        self.updated_at = now;
        Ok(())
    }
}
