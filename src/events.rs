use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::providers::types::EventType;

/// The canonical outbound payload shape (spec §4.6), serialized once per
/// processed notification and fanned out to both webhooks and integrations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub created_at: DateTime<Utc>,
    pub data: DomainEventData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEventData {
    pub app_user_id: String,
    pub subscriber_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription: Option<DomainEventSubscription>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction: Option<DomainEventTransaction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entitlements: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEventSubscription {
    pub id: String,
    pub product_id: String,
    pub platform: String,
    pub status: String,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEventTransaction {
    pub id: String,
    pub amount: Option<i64>,
    pub currency: Option<String>,
}

impl DomainEvent {
    pub fn new(event_type: EventType, data: DomainEventData) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            event_type,
            created_at: Utc::now(),
            data,
        }
    }
}
