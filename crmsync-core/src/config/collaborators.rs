//! Endpoints of the CRM store and the analytics sink.

use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrmConfig {
    /// Remote CRM API. `None` reads from the embedded object store.
    pub base_url: Option<Url>,
    pub fetch_timeout: Duration,
}

impl Default for CrmConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            fetch_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkConfig {
    pub url: Url,
    /// Bearer token; the sink answers 401 without it.
    pub token: String,
    /// `source` field of every batch.
    pub source: String,
    pub push_timeout: Duration,
}
