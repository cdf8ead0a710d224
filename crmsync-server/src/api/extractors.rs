//! Custom Axum extractors.
//!
//! Provides:
//! - `ApiJson<T>`: JSON body whose rejections are reported as validation errors (400).
//! - `SignedDelivery`: raw body plus the `X-Webhook-Signature` header, kept
//!   byte-exact so the consumer can verify the HMAC over what was sent.

use axum::{
    body::Bytes,
    extract::{FromRequest, Request},
};
use crmsync_sdk::signature::SIGNATURE_HEADER;

use super::error::ApiError;
use crmsync_core::PipelineError;

#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

/// A delivery addressed to this consumer, not yet verified.
#[derive(Debug)]
pub struct SignedDelivery {
    pub signature: Option<String>,
    pub body: Bytes,
}

impl<S: Send + Sync> FromRequest<S> for SignedDelivery {
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let signature = req
            .headers()
            .get(SIGNATURE_HEADER)
            .map(|value| {
                value
                    .to_str()
                    .map(str::to_owned)
                    .map_err(|_| PipelineError::Auth("non-ascii signature header".into()))
            })
            .transpose()?;
        let body = Bytes::from_request(req, state)
            .await
            .map_err(|e| PipelineError::validation(e.body_text()))?;
        Ok(Self { signature, body })
    }
}
