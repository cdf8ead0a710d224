//! HTTP client for the analytics sink (`POST /` with a bearer token).

use super::{AnalyticsSink, CollaboratorError};
use crate::config::SinkConfig;
use async_trait::async_trait;
use crmsync_sdk::objects::{SinkBatch, SinkResponse};

pub struct HttpSinkClient {
    config: SinkConfig,
    http_client: reqwest::Client,
}

impl HttpSinkClient {
    pub fn new(config: SinkConfig) -> Result<Self, reqwest::Error> {
        let http_client = reqwest::Client::builder()
            .timeout(config.push_timeout)
            .build()?;
        Ok(Self {
            config,
            http_client,
        })
    }
}

#[async_trait]
impl AnalyticsSink for HttpSinkClient {
    #[tracing::instrument(skip_all, err, fields(points = batch.data.len()))]
    async fn push(&self, batch: &SinkBatch) -> Result<SinkResponse, CollaboratorError> {
        let response = self
            .http_client
            .post(self.config.url.clone())
            .bearer_auth(&self.config.token)
            .json(batch)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CollaboratorError::from_status(status, body));
        }
        Ok(response.json().await?)
    }
}
