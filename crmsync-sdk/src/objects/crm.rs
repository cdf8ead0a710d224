//! CRM object store API types.

use serde::{Deserialize, Serialize};

/// A CRM record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrmObjectResponse {
    pub id: String,
    pub object_type: String,
    pub properties: serde_json::Map<String, serde_json::Value>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// `POST /objects/{type}` and `PATCH /objects/{type}/{id}` request body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateObjectRequest {
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
}

const DEFAULT_LIMIT: u32 = 20;
const MAX_LIMIT: u32 = 100;

/// Query parameters for `GET /objects/{type}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListObjectsQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Cursor: return objects after this id.
    #[serde(default)]
    pub after: Option<String>,
}

impl ListObjectsQuery {
    /// Limit clamped to `1..=100`.
    pub fn clamped_limit(&self) -> usize {
        self.limit.clamp(1, MAX_LIMIT) as usize
    }
}

fn default_limit() -> u32 {
    DEFAULT_LIMIT
}

/// `GET /objects/{type}` response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListObjectsResponse {
    pub results: Vec<CrmObjectResponse>,
    /// Cursor for the next page; absent on the last page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
}
