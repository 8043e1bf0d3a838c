use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::party::PartyKind;

/// Durable in-app notification record. Immutable after creation except for
/// the read flag.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct Notification {
    pub id: Uuid,
    /// The transition event that produced this record. Together with the
    /// recipient and channel it forms the idempotency key.
    pub event_id: Uuid,
    pub recipient_kind: PartyKind,
    pub recipient_id: Uuid,
    pub r#type: String, // 'type' is a reserved keyword
    pub title: String,
    pub message: String,
    pub payload: Option<serde_json::Value>,
    pub action_url: String,
    pub icon: String,
    pub color: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

/// Per-recipient preference row. Absence of a row means email is enabled.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct NotificationPref {
    pub recipient_kind: PartyKind,
    pub recipient_id: Uuid,
    pub category: String,
    pub email_enabled: bool,
}

/// A failed external delivery, parked after retry exhaustion.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone)]
pub struct DeadLetter {
    pub id: Uuid,
    pub channel: String,
    pub recipient_kind: PartyKind,
    pub recipient_id: Uuid,
    pub payload: serde_json::Value,
    pub error: String,
    pub attempts: i32,
    pub created_at: DateTime<Utc>,
}
