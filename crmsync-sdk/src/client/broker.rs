//! Broker API client (CRM producer / operator → broker).

use reqwest::Client;
use url::Url;
use uuid::Uuid;

use super::ClientError;
use crate::objects::{
    BrokerStats, DeregisterResponse, IngressEvent, ListSubscriptionsResponse, PublishResponse,
    RegisterSubscriptionRequest, RegisterSubscriptionResponse, SubscriptionResponse,
};

/// Typed HTTP client for the broker's registration, ingress and replay API.
#[derive(Debug, Clone)]
pub struct BrokerClient {
    http: Client,
    base_url: Url,
}

impl BrokerClient {
    /// Create a new `BrokerClient` for the broker at `base_url`.
    pub fn new(base_url: Url) -> Self {
        Self {
            http: Client::new(),
            base_url,
        }
    }

    /// Replace the default `reqwest::Client` with a custom one (e.g. to
    /// configure timeouts or a proxy).
    pub fn with_http_client(mut self, client: Client) -> Self {
        self.http = client;
        self
    }

    /// `POST /subscriptions` – register a subscriber.
    pub async fn register(
        &self,
        url: &str,
        events: &[&str],
        secret: Option<&str>,
    ) -> Result<RegisterSubscriptionResponse, ClientError> {
        let body = RegisterSubscriptionRequest {
            url: Some(url.to_owned()),
            events: Some(serde_json::Value::from(events.to_vec())),
            secret: secret.map(str::to_owned),
        };
        let url = self.base_url.join("/subscriptions")?;
        let resp = self.http.post(url).json(&body).send().await?;
        parse_response(resp).await
    }

    /// `GET /subscriptions` – list all subscriptions.
    pub async fn list(&self) -> Result<Vec<SubscriptionResponse>, ClientError> {
        let url = self.base_url.join("/subscriptions")?;
        let resp = self.http.get(url).send().await?;
        let list: ListSubscriptionsResponse = parse_response(resp).await?;
        Ok(list.subscriptions)
    }

    /// `DELETE /subscriptions/{id}` – remove a subscription.
    pub async fn deregister(&self, id: Uuid) -> Result<DeregisterResponse, ClientError> {
        let url = self.base_url.join(&format!("/subscriptions/{id}"))?;
        let resp = self.http.delete(url).send().await?;
        parse_response(resp).await
    }

    /// `POST /webhook` – publish a change event.
    pub async fn publish(&self, event: &IngressEvent) -> Result<PublishResponse, ClientError> {
        let url = self.base_url.join("/webhook")?;
        let resp = self.http.post(url).json(event).send().await?;
        parse_response(resp).await
    }

    /// `POST /replay/{eventId}` – re-publish a retained event.
    pub async fn replay(&self, event_id: &str) -> Result<PublishResponse, ClientError> {
        let url = self.base_url.join(&format!("/replay/{event_id}"))?;
        let resp = self.http.post(url).send().await?;
        parse_response(resp).await
    }

    /// `GET /stats` – broker statistics.
    pub async fn stats(&self) -> Result<BrokerStats, ClientError> {
        let url = self.base_url.join("/stats")?;
        let resp = self.http.get(url).send().await?;
        parse_response(resp).await
    }
}

async fn parse_response<T: serde::de::DeserializeOwned>(
    resp: reqwest::Response,
) -> Result<T, ClientError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(ClientError::Api { status, body });
    }
    let bytes = resp.bytes().await?;
    serde_json::from_slice(&bytes).map_err(ClientError::Json)
}
