use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePool;
use uuid::Uuid;

/// A named grant identifier an app defines, e.g. `"premium"` or `"pro_tier"`
/// (spec §4.5). Subscriptions don't carry entitlements directly — products
/// map to them through `ProductEntitlement`, so the same entitlement can be
/// unlocked by several products across several platforms.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EntitlementDefinition {
    pub id: String,
    pub app_id: String,
    pub identifier: String,
    pub created_at: DateTime<Utc>,
}

impl EntitlementDefinition {
    pub fn new(app_id: String, identifier: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            app_id,
            identifier,
            created_at: Utc::now(),
        }
    }

    pub async fn create(&self, pool: &SqlitePool) -> Result<(), sqlx::Error> {
        sqlx::query("INSERT INTO entitlement_definitions (id, app_id, identifier, created_at) VALUES (?, ?, ?, ?)")
            .bind(&self.id)
            .bind(&self.app_id)
            .bind(&self.identifier)
            .bind(self.created_at)
            .execute(pool)
            .await?;

        Ok(())
    }

    pub async fn find_by_identifier(
        app_id: &str,
        identifier: &str,
        pool: &SqlitePool,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>("SELECT * FROM entitlement_definitions WHERE app_id = ? AND identifier = ?")
            .bind(app_id)
            .bind(identifier)
            .fetch_optional(pool)
            .await
    }

    pub async fn list_for_app(app_id: &str, pool: &SqlitePool) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Self>("SELECT * FROM entitlement_definitions WHERE app_id = ?")
            .bind(app_id)
            .fetch_all(pool)
            .await
    }
}

/// The product-to-entitlement mapping table backing the resolver's union
/// rule (spec §4.5): given a product_id, which entitlement identifiers does
/// it unlock.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProductEntitlement {
    pub app_id: String,
    pub product_id: String,
    pub entitlement_id: String,
}

impl ProductEntitlement {
    pub async fn attach(app_id: &str, product_id: &str, entitlement_id: &str, pool: &SqlitePool) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT OR IGNORE INTO product_entitlements (app_id, product_id, entitlement_id) VALUES (?, ?, ?)",
        )
        .bind(app_id)
        .bind(product_id)
        .bind(entitlement_id)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Entitlement identifiers unlocked by a product, joined through
    /// `entitlement_definitions` to return human identifiers rather than ids.
    pub async fn identifiers_for_product(
        app_id: &str,
        product_id: &str,
        pool: &SqlitePool,
    ) -> Result<Vec<String>, sqlx::Error> {
        sqlx::query_scalar::<_, String>(
            r#"
            SELECT ed.identifier FROM product_entitlements pe
            JOIN entitlement_definitions ed ON ed.id = pe.entitlement_id
            WHERE pe.app_id = ? AND pe.product_id = ?
            "#,
        )
        .bind(app_id)
        .bind(product_id)
        .fetch_all(pool)
        .await
    }
}
