//! Clients for the systems the consumer reads from and writes to.
//!
//! The worker pool only sees [`CrmSource`] and [`AnalyticsSink`]; tests plug
//! in fakes, the server plugs in the HTTP clients or the embedded CRM store.

pub mod crm_client;
pub mod sink_client;

pub use crm_client::HttpCrmClient;
pub use sink_client::HttpSinkClient;

use async_trait::async_trait;
use crmsync_sdk::objects::{SinkBatch, SinkResponse};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CollaboratorError {
    /// Network failure, timeout or 5xx. Worth another attempt.
    #[error("transient failure: {0}")]
    Transient(String),

    /// 401 / 403: retrying with the same credentials cannot help.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Any other non-success answer.
    #[error("rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

impl CollaboratorError {
    pub fn is_transient(&self) -> bool {
        matches!(self, CollaboratorError::Transient(_))
    }

    /// Classify a non-success status.
    pub fn from_status(status: reqwest::StatusCode, body: String) -> Self {
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            CollaboratorError::Transient(format!("status {}: {body}", status.as_u16()))
        } else if status == reqwest::StatusCode::UNAUTHORIZED
            || status == reqwest::StatusCode::FORBIDDEN
        {
            CollaboratorError::Unauthorized(body)
        } else {
            CollaboratorError::Rejected {
                status: status.as_u16(),
                body,
            }
        }
    }
}

impl From<reqwest::Error> for CollaboratorError {
    fn from(e: reqwest::Error) -> Self {
        CollaboratorError::Transient(e.to_string())
    }
}

/// Source of authoritative object state.
#[async_trait]
pub trait CrmSource: Send + Sync {
    /// Current properties of an object, `None` if it no longer exists.
    async fn fetch_object(
        &self,
        object_type: &str,
        object_id: &str,
    ) -> Result<Option<Map<String, Value>>, CollaboratorError>;
}

/// Destination of transformed data points.
#[async_trait]
pub trait AnalyticsSink: Send + Sync {
    async fn push(&self, batch: &SinkBatch) -> Result<SinkResponse, CollaboratorError>;
}
