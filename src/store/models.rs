//! Row types.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A conversation thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ChatSession {
    /// UUID v4, hyphenated.
    pub id: String,
    /// Client key of the request that opened the session.
    pub client_key: Option<String>,
    pub created_at: String,
}

/// One message of a session. `id` grows with creation order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ChatMessage {
    pub id: i64,
    pub session_id: String,
    /// `user` or `assistant`.
    pub role: String,
    pub content: String,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Feedback {
    pub id: i64,
    pub session_id: Option<String>,
    pub user_name: String,
    pub user_email: String,
    pub user_phone: Option<String>,
    pub message: String,
    pub rating: Option<i64>,
    pub is_resolved: bool,
    pub created_at: String,
}

/// Fields accepted when recording new feedback.
#[derive(Debug, Clone, Default)]
pub struct NewFeedback {
    pub session_id: Option<String>,
    pub user_name: String,
    pub user_email: String,
    pub user_phone: Option<String>,
    pub message: String,
    pub rating: Option<i64>,
}

/// A stored admin principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct AdminUser {
    pub id: i64,
    pub email: String,
    pub name: Option<String>,
    pub picture: Option<String>,
    pub role: String,
    pub is_active: bool,
    pub created_at: String,
}

/// A persisted security event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct SecurityEventRow {
    pub id: i64,
    pub event_type: String,
    pub detail: Option<String>,
    pub client_key: Option<String>,
    pub created_at: String,
}

/// The single traffic summary row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct TrafficRow {
    pub total_requests: i64,
    pub total_latency_ms: f64,
    pub first_started_at: String,
}
