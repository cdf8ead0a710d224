//! Read-only stats responses.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// `GET /stats` response body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerStats {
    pub total_subscriptions: u64,
    pub active_subscriptions: u64,
    pub retained_events: u64,
    pub events_by_type: BTreeMap<String, u64>,
    pub deliveries_succeeded: u64,
    pub deliveries_failed: u64,
}

/// Number of jobs in each queue state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStateCounts {
    pub pending: u64,
    pub processing: u64,
    pub failed: u64,
}

/// Counters maintained by the worker pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineCounters {
    pub jobs_accepted: u64,
    pub jobs_coalesced: u64,
    pub jobs_succeeded: u64,
    pub jobs_retried: u64,
    pub jobs_failed: u64,
    pub jobs_skipped_deleted: u64,
    pub points_pushed: u64,
}

/// `GET /consumer/stats` response body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerStats {
    pub jobs: JobStateCounts,
    pub counters: PipelineCounters,
}

/// A queued or failed job as shown by the consumer API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobView {
    pub id: i64,
    pub event_type: String,
    pub object_type: String,
    pub object_id: String,
    pub state: String,
    pub attempts: u32,
    pub max_attempts: u32,
    pub enqueued_at: i64,
    pub visible_at: i64,
    pub last_error: Option<String>,
}
