//! Storage abstractions.
//!
//! The registry, the event log and the job queue only ever talk to these
//! traits. [`memory`] backs them with in-process collections, [`postgres`]
//! with the `DatabaseProcessor` queries that live beside each entity.
//!
//! Every mutating method is a single atomic step: counter updates and job
//! state transitions never leave a read-modify-write window open to other
//! callers.

pub mod memory;
pub mod postgres;

use crate::entities::{
    ChangeEvent, DeliveryJob, Enqueued, FailureRecorded, NewJob, Subscription,
};
use async_trait::async_trait;
use crmsync_sdk::objects::JobStateCounts;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

pub use memory::{MemoryEventStore, MemoryJobStore, MemorySubscriptionStore};
pub use postgres::{PgEventStore, PgJobStore, PgSubscriptionStore};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("job {0} does not exist")]
    JobNotFound(i64),
}

/// How long, and how many, change events are kept for replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub window: Duration,
    pub max_events: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(24 * 60 * 60),
            max_events: 10_000,
        }
    }
}

impl RetentionPolicy {
    /// Oldest record time still inside the window.
    pub fn cutoff(&self, now: OffsetDateTime) -> OffsetDateTime {
        crate::utils::calendar::saturating_before(now, self.window)
    }
}

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Insert or overwrite by id.
    async fn put(&self, subscription: Subscription) -> Result<(), StoreError>;
    async fn get(&self, id: Uuid) -> Result<Option<Subscription>, StoreError>;
    /// Returns whether something was removed.
    async fn delete(&self, id: Uuid) -> Result<bool, StoreError>;
    /// Snapshot in insertion order.
    async fn list(&self) -> Result<Vec<Subscription>, StoreError>;
    async fn record_success(
        &self,
        id: Uuid,
        at: OffsetDateTime,
    ) -> Result<Option<Subscription>, StoreError>;
    /// Count one failure; deactivate once the error count exceeds `threshold`.
    async fn record_failure(
        &self,
        id: Uuid,
        threshold: u64,
    ) -> Result<Option<FailureRecorded>, StoreError>;
}

#[async_trait]
pub trait EventStore: Send + Sync {
    /// Record an event and prune what fell out of retention. Returns `false`
    /// when an event with the same id is already retained.
    async fn append(&self, event: ChangeEvent, now: OffsetDateTime) -> Result<bool, StoreError>;
    /// An event still inside the retention window.
    async fn get(
        &self,
        event_id: &str,
        now: OffsetDateTime,
    ) -> Result<Option<ChangeEvent>, StoreError>;
    async fn count_by_type(&self) -> Result<BTreeMap<String, u64>, StoreError>;
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Add a job, or merge it into a pending untouched job of the same object
    /// when `coalesce` is set.
    async fn enqueue(&self, job: NewJob, coalesce: bool) -> Result<Enqueued, StoreError>;
    /// Move one due job to `processing` and hide it until `lease_until`.
    ///
    /// Due means `pending` and visible, or still `processing` past its lease:
    /// a worker that lost track of its claim does not strand the job. A claim
    /// is never handed to a second caller while its lease holds.
    async fn claim_due(
        &self,
        now: OffsetDateTime,
        lease_until: OffsetDateTime,
    ) -> Result<Option<DeliveryJob>, StoreError>;
    async fn get(&self, id: i64) -> Result<Option<DeliveryJob>, StoreError>;
    /// The job is done and removed.
    async fn complete(&self, id: i64) -> Result<(), StoreError>;
    async fn reschedule(
        &self,
        id: i64,
        attempts: u32,
        visible_at: OffsetDateTime,
        last_error: String,
    ) -> Result<(), StoreError>;
    async fn fail(&self, id: i64, attempts: u32, last_error: String) -> Result<(), StoreError>;
    /// Return `processing` jobs abandoned by a previous run to `pending`,
    /// visible at `now`.
    async fn recover_processing(&self, now: OffsetDateTime) -> Result<u64, StoreError>;
    async fn counts(&self) -> Result<JobStateCounts, StoreError>;
    /// Most recent terminally failed jobs first.
    async fn failed(&self, limit: usize) -> Result<Vec<DeliveryJob>, StoreError>;
}
