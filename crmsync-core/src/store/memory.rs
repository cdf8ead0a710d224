//! In-process stores for tests and single-node runs.

use super::{EventStore, JobStore, RetentionPolicy, StoreError, SubscriptionStore};
use crate::entities::delivery_job::coalesce_into;
use crate::entities::{
    ChangeEvent, DeliveryJob, Enqueued, FailureRecorded, JobState, NewJob, Subscription,
};
use async_trait::async_trait;
use crmsync_sdk::objects::JobStateCounts;
use itertools::Itertools;
use std::collections::{BTreeMap, VecDeque};
use time::OffsetDateTime;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct MemorySubscriptionStore {
    subscriptions: RwLock<Vec<Subscription>>,
}

impl MemorySubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SubscriptionStore for MemorySubscriptionStore {
    async fn put(&self, subscription: Subscription) -> Result<(), StoreError> {
        let mut subscriptions = self.subscriptions.write().await;
        match subscriptions.iter_mut().find(|s| s.id == subscription.id) {
            Some(existing) => *existing = subscription,
            None => subscriptions.push(subscription),
        }
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Subscription>, StoreError> {
        let subscriptions = self.subscriptions.read().await;
        Ok(subscriptions.iter().find(|s| s.id == id).cloned())
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut subscriptions = self.subscriptions.write().await;
        let before = subscriptions.len();
        subscriptions.retain(|s| s.id != id);
        Ok(subscriptions.len() != before)
    }

    async fn list(&self) -> Result<Vec<Subscription>, StoreError> {
        Ok(self.subscriptions.read().await.clone())
    }

    async fn record_success(
        &self,
        id: Uuid,
        at: OffsetDateTime,
    ) -> Result<Option<Subscription>, StoreError> {
        let mut subscriptions = self.subscriptions.write().await;
        Ok(subscriptions.iter_mut().find(|s| s.id == id).map(|s| {
            s.success_count += 1;
            s.last_notified_at = Some(at);
            s.clone()
        }))
    }

    async fn record_failure(
        &self,
        id: Uuid,
        threshold: u64,
    ) -> Result<Option<FailureRecorded>, StoreError> {
        let mut subscriptions = self.subscriptions.write().await;
        Ok(subscriptions.iter_mut().find(|s| s.id == id).map(|s| {
            let was_active = s.active;
            s.error_count += 1;
            if s.error_count > threshold {
                s.active = false;
            }
            FailureRecorded {
                deactivated: was_active && !s.active,
                subscription: s.clone(),
            }
        }))
    }
}

#[derive(Debug, Clone)]
struct RetainedEvent {
    recorded_at: OffsetDateTime,
    event: ChangeEvent,
}

/// Append-only event log with time and size bounded retention.
#[derive(Debug)]
pub struct MemoryEventStore {
    retention: RetentionPolicy,
    events: RwLock<VecDeque<RetainedEvent>>,
}

impl MemoryEventStore {
    pub fn new(retention: RetentionPolicy) -> Self {
        Self {
            retention,
            events: RwLock::new(VecDeque::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.events.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.events.read().await.is_empty()
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn append(&self, event: ChangeEvent, now: OffsetDateTime) -> Result<bool, StoreError> {
        let cutoff = self.retention.cutoff(now);
        let mut events = self.events.write().await;
        while events.front().is_some_and(|e| e.recorded_at < cutoff) {
            events.pop_front();
        }
        if events.iter().any(|e| e.event.event_id == event.event_id) {
            return Ok(false);
        }
        events.push_back(RetainedEvent {
            recorded_at: now,
            event,
        });
        while events.len() > self.retention.max_events {
            events.pop_front();
        }
        Ok(true)
    }

    async fn get(
        &self,
        event_id: &str,
        now: OffsetDateTime,
    ) -> Result<Option<ChangeEvent>, StoreError> {
        let cutoff = self.retention.cutoff(now);
        let events = self.events.read().await;
        Ok(events
            .iter()
            .find(|e| e.event.event_id == event_id && e.recorded_at >= cutoff)
            .map(|e| e.event.clone()))
    }

    async fn count_by_type(&self) -> Result<BTreeMap<String, u64>, StoreError> {
        let events = self.events.read().await;
        Ok(events
            .iter()
            .map(|e| e.event.event_type.as_str())
            .counts()
            .into_iter()
            .map(|(event_type, n)| (event_type.to_owned(), n as u64))
            .collect())
    }
}

#[derive(Debug, Default)]
struct JobTable {
    next_id: i64,
    jobs: BTreeMap<i64, DeliveryJob>,
}

/// Job queue held in one mutex; every transition happens under it.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    table: Mutex<JobTable>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn enqueue(&self, job: NewJob, coalesce: bool) -> Result<Enqueued, StoreError> {
        let mut table = self.table.lock().await;
        if coalesce {
            let target = table.jobs.values_mut().find(|j| {
                j.state == JobState::Pending
                    && j.attempts == 0
                    && j.object_type == job.object_type
                    && j.object_id == job.object_id
            });
            if let Some(existing) = target {
                coalesce_into(existing, job);
                return Ok(Enqueued {
                    job_id: existing.id,
                    coalesced: true,
                });
            }
        }
        table.next_id += 1;
        let id = table.next_id;
        table.jobs.insert(id, job.into_job(id));
        Ok(Enqueued {
            job_id: id,
            coalesced: false,
        })
    }

    async fn claim_due(
        &self,
        now: OffsetDateTime,
        lease_until: OffsetDateTime,
    ) -> Result<Option<DeliveryJob>, StoreError> {
        let mut table = self.table.lock().await;
        let due = table
            .jobs
            .values_mut()
            .filter(|j| j.state != JobState::Failed && j.visible_at <= now)
            .min_by_key(|j| (j.visible_at, j.id));
        Ok(due.map(|job| {
            job.state = JobState::Processing;
            job.visible_at = lease_until;
            job.clone()
        }))
    }

    async fn get(&self, id: i64) -> Result<Option<DeliveryJob>, StoreError> {
        Ok(self.table.lock().await.jobs.get(&id).cloned())
    }

    async fn complete(&self, id: i64) -> Result<(), StoreError> {
        let mut table = self.table.lock().await;
        table
            .jobs
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::JobNotFound(id))
    }

    async fn reschedule(
        &self,
        id: i64,
        attempts: u32,
        visible_at: OffsetDateTime,
        last_error: String,
    ) -> Result<(), StoreError> {
        let mut table = self.table.lock().await;
        let job = table.jobs.get_mut(&id).ok_or(StoreError::JobNotFound(id))?;
        if job.state == JobState::Processing {
            job.state = JobState::Pending;
            job.attempts = attempts;
            job.visible_at = visible_at;
            job.last_error = Some(last_error);
        }
        Ok(())
    }

    async fn fail(&self, id: i64, attempts: u32, last_error: String) -> Result<(), StoreError> {
        let mut table = self.table.lock().await;
        let job = table.jobs.get_mut(&id).ok_or(StoreError::JobNotFound(id))?;
        job.state = JobState::Failed;
        job.attempts = attempts;
        job.last_error = Some(last_error);
        Ok(())
    }

    async fn recover_processing(&self, now: OffsetDateTime) -> Result<u64, StoreError> {
        let mut table = self.table.lock().await;
        let mut recovered = 0;
        for job in table
            .jobs
            .values_mut()
            .filter(|j| j.state == JobState::Processing)
        {
            job.state = JobState::Pending;
            job.visible_at = job.visible_at.min(now);
            recovered += 1;
        }
        Ok(recovered)
    }

    async fn counts(&self) -> Result<JobStateCounts, StoreError> {
        let table = self.table.lock().await;
        let mut counts = JobStateCounts::default();
        for job in table.jobs.values() {
            match job.state {
                JobState::Pending => counts.pending += 1,
                JobState::Processing => counts.processing += 1,
                JobState::Failed => counts.failed += 1,
            }
        }
        Ok(counts)
    }

    async fn failed(&self, limit: usize) -> Result<Vec<DeliveryJob>, StoreError> {
        let table = self.table.lock().await;
        Ok(table
            .jobs
            .values()
            .rev()
            .filter(|j| j.state == JobState::Failed)
            .take(limit)
            .cloned()
            .collect())
    }
}
