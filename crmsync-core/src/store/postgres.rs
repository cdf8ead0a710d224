//! Postgres-backed stores.

use super::{EventStore, JobStore, RetentionPolicy, StoreError, SubscriptionStore};
use crate::entities::change_event::{
    CountChangeEventsByType, GetRetainedChangeEvent, InsertChangeEvent, PruneChangeEvents,
};
use crate::entities::delivery_job::{
    ClaimDueDeliveryJob, CoalesceDeliveryJob, CountDeliveryJobsByState, DeleteDeliveryJob,
    FailDeliveryJob, GetDeliveryJob, InsertDeliveryJob, ListFailedDeliveryJobs,
    RecoverProcessingDeliveryJobs, RescheduleDeliveryJob,
};
use crate::entities::subscription::{
    DeleteSubscription, GetSubscription, ListSubscriptions, RecordSubscriptionFailure,
    RecordSubscriptionSuccess, UpsertSubscription,
};
use crate::entities::{
    ChangeEvent, DeliveryJob, Enqueued, FailureRecorded, JobState, NewJob, Subscription,
};
use crate::framework::DatabaseProcessor;
use async_trait::async_trait;
use crmsync_sdk::objects::JobStateCounts;
use kanau::processor::Processor;
use std::collections::BTreeMap;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct PgSubscriptionStore {
    db: DatabaseProcessor,
}

impl PgSubscriptionStore {
    pub fn new(db: DatabaseProcessor) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SubscriptionStore for PgSubscriptionStore {
    async fn put(&self, subscription: Subscription) -> Result<(), StoreError> {
        Ok(self.db.process(UpsertSubscription { subscription }).await?)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Subscription>, StoreError> {
        Ok(self.db.process(GetSubscription { id }).await?)
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(self.db.process(DeleteSubscription { id }).await?)
    }

    async fn list(&self) -> Result<Vec<Subscription>, StoreError> {
        Ok(self.db.process(ListSubscriptions).await?)
    }

    async fn record_success(
        &self,
        id: Uuid,
        at: OffsetDateTime,
    ) -> Result<Option<Subscription>, StoreError> {
        Ok(self.db.process(RecordSubscriptionSuccess { id, at }).await?)
    }

    async fn record_failure(
        &self,
        id: Uuid,
        threshold: u64,
    ) -> Result<Option<FailureRecorded>, StoreError> {
        Ok(self
            .db
            .process(RecordSubscriptionFailure { id, threshold })
            .await?)
    }
}

#[derive(Debug, Clone)]
pub struct PgEventStore {
    db: DatabaseProcessor,
    retention: RetentionPolicy,
}

impl PgEventStore {
    pub fn new(db: DatabaseProcessor, retention: RetentionPolicy) -> Self {
        Self { db, retention }
    }
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn append(&self, event: ChangeEvent, now: OffsetDateTime) -> Result<bool, StoreError> {
        let inserted = self
            .db
            .process(InsertChangeEvent {
                event,
                recorded_at: now,
            })
            .await?;
        let pruned = self
            .db
            .process(PruneChangeEvents {
                recorded_before: self.retention.cutoff(now),
                keep: i64::try_from(self.retention.max_events).unwrap_or(i64::MAX),
            })
            .await?;
        if pruned > 0 {
            tracing::debug!(pruned, "Pruned change events outside retention");
        }
        Ok(inserted)
    }

    async fn get(
        &self,
        event_id: &str,
        now: OffsetDateTime,
    ) -> Result<Option<ChangeEvent>, StoreError> {
        Ok(self
            .db
            .process(GetRetainedChangeEvent {
                event_id: event_id.to_owned(),
                recorded_after: self.retention.cutoff(now),
            })
            .await?)
    }

    async fn count_by_type(&self) -> Result<BTreeMap<String, u64>, StoreError> {
        let rows = self.db.process(CountChangeEventsByType).await?;
        Ok(rows
            .into_iter()
            .map(|r| (r.event_type, r.count.max(0) as u64))
            .collect())
    }
}

#[derive(Debug, Clone)]
pub struct PgJobStore {
    db: DatabaseProcessor,
}

impl PgJobStore {
    pub fn new(db: DatabaseProcessor) -> Self {
        Self { db }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn enqueue(&self, job: NewJob, coalesce: bool) -> Result<Enqueued, StoreError> {
        // Two racing enqueues for one object may both insert; that only costs
        // an extra sink write.
        if coalesce
            && let Some(job_id) = self
                .db
                .process(CoalesceDeliveryJob { job: job.clone() })
                .await?
        {
            return Ok(Enqueued {
                job_id,
                coalesced: true,
            });
        }
        let job_id = self.db.process(InsertDeliveryJob { job }).await?;
        Ok(Enqueued {
            job_id,
            coalesced: false,
        })
    }

    async fn claim_due(
        &self,
        now: OffsetDateTime,
        lease_until: OffsetDateTime,
    ) -> Result<Option<DeliveryJob>, StoreError> {
        Ok(self
            .db
            .process(ClaimDueDeliveryJob { now, lease_until })
            .await?)
    }

    async fn get(&self, id: i64) -> Result<Option<DeliveryJob>, StoreError> {
        Ok(self.db.process(GetDeliveryJob { id }).await?)
    }

    async fn complete(&self, id: i64) -> Result<(), StoreError> {
        Ok(self.db.process(DeleteDeliveryJob { id }).await?)
    }

    async fn reschedule(
        &self,
        id: i64,
        attempts: u32,
        visible_at: OffsetDateTime,
        last_error: String,
    ) -> Result<(), StoreError> {
        Ok(self
            .db
            .process(RescheduleDeliveryJob {
                id,
                attempts,
                visible_at,
                last_error,
            })
            .await?)
    }

    async fn fail(&self, id: i64, attempts: u32, last_error: String) -> Result<(), StoreError> {
        Ok(self
            .db
            .process(FailDeliveryJob {
                id,
                attempts,
                last_error,
            })
            .await?)
    }

    async fn recover_processing(&self, now: OffsetDateTime) -> Result<u64, StoreError> {
        Ok(self.db.process(RecoverProcessingDeliveryJobs { now }).await?)
    }

    async fn counts(&self) -> Result<JobStateCounts, StoreError> {
        let rows = self.db.process(CountDeliveryJobsByState).await?;
        let mut counts = JobStateCounts::default();
        for row in rows {
            let n = row.count.max(0) as u64;
            match row.state {
                JobState::Pending => counts.pending = n,
                JobState::Processing => counts.processing = n,
                JobState::Failed => counts.failed = n,
            }
        }
        Ok(counts)
    }

    async fn failed(&self, limit: usize) -> Result<Vec<DeliveryJob>, StoreError> {
        Ok(self
            .db
            .process(ListFailedDeliveryJobs {
                limit: i64::try_from(limit).unwrap_or(i64::MAX),
            })
            .await?)
    }
}
