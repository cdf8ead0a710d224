//! Subscription registration API types.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// `POST /subscriptions` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterSubscriptionRequest {
    /// Destination URL deliveries are POSTed to.
    #[serde(default)]
    pub url: Option<String>,
    /// Event-type patterns (`*`, exact event types, or object-type prefixes).
    #[serde(default)]
    pub events: Option<serde_json::Value>,
    /// Shared HMAC secret. Generated by the broker when omitted.
    #[serde(default)]
    pub secret: Option<String>,
}

/// `POST /subscriptions` response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterSubscriptionResponse {
    pub subscription_id: Uuid,
    /// Present only when the broker generated the secret.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}

/// A subscription as shown by `GET /subscriptions`. The secret is never listed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionResponse {
    pub id: Uuid,
    pub url: String,
    pub events: Vec<String>,
    pub active: bool,
    pub created_at: i64,
    pub last_notified_at: Option<i64>,
    pub success_count: u64,
    pub error_count: u64,
}

/// `GET /subscriptions` response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListSubscriptionsResponse {
    pub subscriptions: Vec<SubscriptionResponse>,
}

/// `DELETE /subscriptions/{id}` response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeregisterResponse {
    pub deleted: Uuid,
}
