//! Outbound delivery body.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::event::ChangeEventPayload;
use crate::signature::Signature;

/// Body POSTed to a subscriber URL, signed with the subscription secret.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryPayload {
    pub subscription_id: Uuid,
    pub event: ChangeEventPayload,
    /// Time the delivery was built (unix millis).
    pub timestamp: i64,
}

impl Signature for DeliveryPayload {}

/// `POST /consumer/webhook` response body (202).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntakeAcceptedResponse {
    pub accepted: bool,
    pub job_id: i64,
    /// The event was merged into an already queued job for the same object.
    pub coalesced: bool,
}

/// `GET /consumer/jobs/failed` response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedJobsResponse {
    pub jobs: Vec<super::stats::JobView>,
}
