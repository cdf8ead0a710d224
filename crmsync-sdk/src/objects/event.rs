//! Change event types.

use serde::{Deserialize, Serialize};

/// `POST /webhook` request body.
///
/// Every field is optional at the serde level so that a malformed event is
/// reported as a validation failure rather than a deserialization error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngressEvent {
    #[serde(default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub object_type: Option<String>,
    #[serde(default)]
    pub object_id: Option<String>,
    #[serde(default)]
    pub event_id: Option<String>,
    #[serde(default)]
    pub occurred_at: Option<i64>,
    #[serde(default)]
    pub properties: Option<serde_json::Map<String, serde_json::Value>>,
}

/// A recorded change event as it travels inside a delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEventPayload {
    pub event_id: String,
    pub event_type: String,
    pub object_type: String,
    pub object_id: String,
    pub occurred_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<serde_json::Map<String, serde_json::Value>>,
}

/// `POST /webhook` and `POST /replay/{eventId}` response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishResponse {
    pub event_id: String,
    pub notifications_sent: u32,
    pub notifications_failed: u32,
}
