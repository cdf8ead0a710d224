//! Error taxonomy shared by the broker and the consumer.
//!
//! | Variant            | Surfaced as | Retried |
//! |--------------------|-------------|---------|
//! | `Validation`       | 400         | never   |
//! | `NotFound`         | 404         | never   |
//! | `Auth`             | 401         | never   |
//! | `ExhaustedRetries` | logged and counted | never (terminal) |
//! | `Store`            | 500         | n/a     |
//!
//! A failed delivery attempt is a [`DeliveryError`] and stays inside the
//! fan-out report or the job queue; it never reaches the ingress caller.
//!
//! [`DeliveryError`]: crate::processors::DeliveryError

use crate::store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Malformed input.
    #[error("validation error: {0}")]
    Validation(String),

    /// Unknown subscription or expired / never-seen event.
    #[error("not found: {0}")]
    NotFound(String),

    /// Missing or invalid sink token or webhook signature.
    #[error("authentication error: {0}")]
    Auth(String),

    /// A job used all of its attempts.
    #[error("job {job_id} exhausted {attempts} attempts: {last_error}")]
    ExhaustedRetries {
        job_id: i64,
        attempts: u32,
        last_error: String,
    },

    /// Persistent store failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl PipelineError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }
}
