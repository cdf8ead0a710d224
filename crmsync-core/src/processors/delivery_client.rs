//! Delivery Client.
//!
//! One signed HTTP POST per (event, subscription) pair. The client never
//! retries: a status below 500 counts as delivered, so 4xx rejections are
//! final at the broker layer, and only network failures, timeouts and 5xx
//! answers come back as [`DeliveryError`].

use crate::entities::{ChangeEvent, Subscription};
use async_trait::async_trait;
use crmsync_sdk::objects::{DeliveryPayload, unix_millis};
use crmsync_sdk::signature::{SIGNATURE_HEADER, SignedPayload};
use std::time::Duration;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::debug;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("request timed out")]
    Timeout,

    #[error("subscriber answered {status}: {body}")]
    ServerError { status: u16, body: String },

    #[error("payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<reqwest::Error> for DeliveryError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            DeliveryError::Timeout
        } else {
            DeliveryError::Request(e.to_string())
        }
    }
}

/// Build the canonical delivery body and sign it with the subscription secret.
pub fn build_signed_delivery(
    subscription: &Subscription,
    event: &ChangeEvent,
    now: OffsetDateTime,
) -> Result<SignedPayload<DeliveryPayload>, serde_json::Error> {
    let payload = DeliveryPayload {
        subscription_id: subscription.id,
        event: event.to_payload(),
        timestamp: unix_millis(now),
    };
    SignedPayload::new(payload, subscription.secret.as_bytes())
}

/// Performs exactly one delivery attempt.
#[async_trait]
pub trait DeliveryTransport: Send + Sync {
    async fn deliver(
        &self,
        subscription: &Subscription,
        event: &ChangeEvent,
    ) -> Result<(), DeliveryError>;
}

pub struct HttpDeliveryClient {
    http_client: reqwest::Client,
}

impl HttpDeliveryClient {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let http_client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http_client })
    }
}

#[async_trait]
impl DeliveryTransport for HttpDeliveryClient {
    #[tracing::instrument(
        skip_all,
        fields(subscription_id = %subscription.id, event_id = %event.event_id)
    )]
    async fn deliver(
        &self,
        subscription: &Subscription,
        event: &ChangeEvent,
    ) -> Result<(), DeliveryError> {
        let signed = build_signed_delivery(subscription, event, OffsetDateTime::now_utc())?;
        let response = self
            .http_client
            .post(&subscription.url)
            .header("Content-Type", "application/json")
            .header(SIGNATURE_HEADER, signed.to_header())
            .body(signed.json)
            .send()
            .await?;

        let status = response.status();
        if status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(DeliveryError::ServerError {
                status: status.as_u16(),
                body,
            });
        }
        if status.is_client_error() {
            debug!(status = status.as_u16(), "Subscriber rejected delivery, not retried");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::parse_patterns;
    use crate::processors::testing::serve;
    use axum::Router;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use crmsync_sdk::signature::verify_body;

    fn subscription(url: &str, secret: &str) -> Subscription {
        Subscription::new(
            url.into(),
            parse_patterns(["*"]).unwrap(),
            secret.into(),
            OffsetDateTime::UNIX_EPOCH,
        )
    }

    fn event() -> ChangeEvent {
        ChangeEvent {
            event_id: "e1".into(),
            event_type: "company.creation".into(),
            object_type: "company".into(),
            object_id: "42".into(),
            occurred_at: OffsetDateTime::UNIX_EPOCH,
            properties: None,
        }
    }

    #[test]
    fn signed_delivery_verifies_with_subscription_secret() {
        let subscription = subscription("http://localhost:9/hook", "topsecret");
        let now = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        let signed = build_signed_delivery(&subscription, &event(), now).unwrap();

        let header = signed.to_header();
        assert!(header.starts_with("v1="));
        verify_body(&header, signed.json.as_bytes(), b"topsecret").unwrap();
        assert!(verify_body(&header, signed.json.as_bytes(), b"other").is_err());

        let body: serde_json::Value = serde_json::from_str(&signed.json).unwrap();
        assert_eq!(body["subscriptionId"], subscription.id.to_string());
        assert_eq!(body["event"]["objectId"], "42");
        assert_eq!(body["timestamp"], 1_700_000_000_000i64);
    }

    #[tokio::test]
    async fn status_below_500_counts_as_delivered() {
        let router = Router::new()
            .route("/ok", post(|| async { StatusCode::OK }))
            .route("/gone", post(|| async { StatusCode::NOT_FOUND }))
            .route("/auth", post(|| async { StatusCode::UNAUTHORIZED }))
            .route(
                "/down",
                post(|| async { (StatusCode::SERVICE_UNAVAILABLE, "maintenance") }),
            )
            .route(
                "/signed",
                post(|headers: HeaderMap, body: String| async move {
                    let header = headers
                        .get(SIGNATURE_HEADER)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default();
                    match verify_body(header, body.as_bytes(), b"hook-secret") {
                        Ok(()) => StatusCode::NO_CONTENT,
                        Err(_) => StatusCode::INTERNAL_SERVER_ERROR,
                    }
                }),
            );
        let addr = serve(router).await;
        let client = HttpDeliveryClient::new(Duration::from_secs(5)).unwrap();

        for path in ["ok", "gone", "auth", "signed"] {
            let target = subscription(&format!("http://{addr}/{path}"), "hook-secret");
            client
                .deliver(&target, &event())
                .await
                .unwrap_or_else(|e| panic!("/{path}: {e}"));
        }

        let down = subscription(&format!("http://{addr}/down"), "hook-secret");
        let err = client.deliver(&down, &event()).await.unwrap_err();
        assert!(
            matches!(&err, DeliveryError::ServerError { status: 503, body } if body == "maintenance"),
            "{err:?}"
        );
    }

    #[tokio::test]
    async fn unreachable_destination_is_a_request_error() {
        let client = HttpDeliveryClient::new(Duration::from_secs(2)).unwrap();
        // Port 9 (discard) on loopback is closed in test environments.
        let target = subscription("http://127.0.0.1:9/hook", "s");
        let err = client.deliver(&target, &event()).await.unwrap_err();
        assert!(matches!(
            err,
            DeliveryError::Request(_) | DeliveryError::Timeout
        ));
    }
}
