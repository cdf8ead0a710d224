//! Fakes shared by the processor tests.

use super::delivery_client::{DeliveryError, DeliveryTransport};
use super::health_tracker::HealthTracker;
use super::publisher::EventPublisher;
use crate::collaborators::{AnalyticsSink, CollaboratorError, CrmSource};
use crate::entities::{ChangeEvent, DeliveryJob, Enqueued, NewJob, Subscription};
use crate::metrics::DeliveryMetrics;
use crate::registry::SubscriptionRegistry;
use crate::store::{
    JobStore, MemoryEventStore, MemoryJobStore, MemorySubscriptionStore, RetentionPolicy,
    StoreError,
};
use async_trait::async_trait;
use crmsync_sdk::objects::{JobStateCounts, RegisterSubscriptionRequest, SinkBatch, SinkResponse};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use time::OffsetDateTime;
use uuid::Uuid;

/// Transport that fails for "down" URLs and on every other call for "flaky" ones.
#[derive(Default)]
pub struct FakeTransport {
    down: HashSet<String>,
    flaky: HashSet<String>,
    flaky_calls: AtomicU64,
    attempts: Mutex<HashMap<Uuid, u64>>,
    failures: Mutex<HashMap<Uuid, u64>>,
    delivered: Mutex<Vec<ChangeEvent>>,
}

impl FakeTransport {
    pub fn with_down(mut self, url: &str) -> Self {
        self.down.insert(url.to_owned());
        self
    }

    pub fn with_flaky(mut self, url: &str) -> Self {
        self.flaky.insert(url.to_owned());
        self
    }

    pub fn attempts_for(&self, id: Uuid) -> u64 {
        self.attempts.lock().unwrap().get(&id).copied().unwrap_or(0)
    }

    pub fn failures_for(&self, id: Uuid) -> u64 {
        self.failures.lock().unwrap().get(&id).copied().unwrap_or(0)
    }

    /// Events that reached a subscriber, in completion order.
    pub fn delivered(&self) -> Vec<ChangeEvent> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeliveryTransport for FakeTransport {
    async fn deliver(
        &self,
        subscription: &Subscription,
        event: &ChangeEvent,
    ) -> Result<(), DeliveryError> {
        tokio::task::yield_now().await;
        *self
            .attempts
            .lock()
            .unwrap()
            .entry(subscription.id)
            .or_default() += 1;
        let fail = self.down.contains(&subscription.url)
            || (self.flaky.contains(&subscription.url)
                && self.flaky_calls.fetch_add(1, Ordering::SeqCst) % 2 == 0);
        if fail {
            *self
                .failures
                .lock()
                .unwrap()
                .entry(subscription.id)
                .or_default() += 1;
            return Err(DeliveryError::Request("connection refused".into()));
        }
        self.delivered.lock().unwrap().push(event.clone());
        Ok(())
    }
}

pub fn broker(
    transport: Arc<dyn DeliveryTransport>,
    failure_threshold: u64,
) -> (SubscriptionRegistry, EventPublisher, Arc<DeliveryMetrics>) {
    let subscriptions = Arc::new(MemorySubscriptionStore::new());
    let registry = SubscriptionRegistry::new(subscriptions.clone());
    let metrics = Arc::new(DeliveryMetrics::default());
    let publisher = EventPublisher::new(
        registry.clone(),
        Arc::new(MemoryEventStore::new(RetentionPolicy::default())),
        transport,
        HealthTracker::new(subscriptions, failure_threshold),
        metrics.clone(),
    );
    (registry, publisher, metrics)
}

pub async fn register(registry: &SubscriptionRegistry, url: &str, patterns: &[&str]) -> Uuid {
    registry
        .register(
            RegisterSubscriptionRequest {
                url: Some(url.to_owned()),
                events: Some(serde_json::json!(patterns)),
                secret: Some("test-secret".into()),
            },
            OffsetDateTime::UNIX_EPOCH,
        )
        .await
        .unwrap()
        .subscription
        .id
}

/// CRM with a fixed set of objects and an optional run of scripted errors.
#[derive(Default)]
pub struct FakeCrm {
    objects: Mutex<HashMap<(String, String), Map<String, Value>>>,
    errors: Mutex<VecDeque<CollaboratorError>>,
    fetches: AtomicU64,
}

impl FakeCrm {
    pub fn with_object(self, object_type: &str, object_id: &str, properties: Value) -> Self {
        self.objects.lock().unwrap().insert(
            (object_type.to_owned(), object_id.to_owned()),
            properties.as_object().cloned().unwrap_or_default(),
        );
        self
    }

    pub fn fail_next(&self, error: CollaboratorError) {
        self.errors.lock().unwrap().push_back(error);
    }

    pub fn fetches(&self) -> u64 {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CrmSource for FakeCrm {
    async fn fetch_object(
        &self,
        object_type: &str,
        object_id: &str,
    ) -> Result<Option<Map<String, Value>>, CollaboratorError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.errors.lock().unwrap().pop_front() {
            return Err(error);
        }
        Ok(self
            .objects
            .lock()
            .unwrap()
            .get(&(object_type.to_owned(), object_id.to_owned()))
            .cloned())
    }
}

/// Sink that records batches and can be told to fail.
#[derive(Default)]
pub struct FakeSink {
    batches: Mutex<Vec<SinkBatch>>,
    errors: Mutex<VecDeque<CollaboratorError>>,
    always_fail: AtomicBool,
    pushes: AtomicU64,
}

impl FakeSink {
    pub fn fail_next(&self, error: CollaboratorError) {
        self.errors.lock().unwrap().push_back(error);
    }

    pub fn fail_always(&self) {
        self.always_fail.store(true, Ordering::SeqCst);
    }

    pub fn pushes(&self) -> u64 {
        self.pushes.load(Ordering::SeqCst)
    }

    pub fn batches(&self) -> Vec<SinkBatch> {
        self.batches.lock().unwrap().clone()
    }
}

#[async_trait]
impl AnalyticsSink for FakeSink {
    async fn push(&self, batch: &SinkBatch) -> Result<SinkResponse, CollaboratorError> {
        self.pushes.fetch_add(1, Ordering::SeqCst);
        if self.always_fail.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Transient("sink unavailable".into()));
        }
        if let Some(error) = self.errors.lock().unwrap().pop_front() {
            return Err(error);
        }
        self.batches.lock().unwrap().push(batch.clone());
        Ok(SinkResponse {
            status: "ok".into(),
            metrics_processed: batch.data.len() as u64,
        })
    }
}

/// Serve `router` on an ephemeral loopback port.
pub async fn serve(router: axum::Router) -> std::net::SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
    addr
}

/// Memory job store whose next state transition can be made to fail once.
pub struct FlakyJobStore {
    inner: Arc<MemoryJobStore>,
    fail_next_write: AtomicBool,
}

impl FlakyJobStore {
    pub fn new(inner: Arc<MemoryJobStore>) -> Self {
        Self {
            inner,
            fail_next_write: AtomicBool::new(false),
        }
    }

    pub fn fail_next_write(&self) {
        self.fail_next_write.store(true, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.fail_next_write.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }
}

#[async_trait]
impl JobStore for FlakyJobStore {
    async fn enqueue(&self, job: NewJob, coalesce: bool) -> Result<Enqueued, StoreError> {
        self.inner.enqueue(job, coalesce).await
    }

    async fn claim_due(
        &self,
        now: OffsetDateTime,
        lease_until: OffsetDateTime,
    ) -> Result<Option<DeliveryJob>, StoreError> {
        self.inner.claim_due(now, lease_until).await
    }

    async fn get(&self, id: i64) -> Result<Option<DeliveryJob>, StoreError> {
        self.inner.get(id).await
    }

    async fn complete(&self, id: i64) -> Result<(), StoreError> {
        self.check()?;
        self.inner.complete(id).await
    }

    async fn reschedule(
        &self,
        id: i64,
        attempts: u32,
        visible_at: OffsetDateTime,
        last_error: String,
    ) -> Result<(), StoreError> {
        self.check()?;
        self.inner
            .reschedule(id, attempts, visible_at, last_error)
            .await
    }

    async fn fail(&self, id: i64, attempts: u32, last_error: String) -> Result<(), StoreError> {
        self.check()?;
        self.inner.fail(id, attempts, last_error).await
    }

    async fn recover_processing(&self, now: OffsetDateTime) -> Result<u64, StoreError> {
        self.inner.recover_processing(now).await
    }

    async fn counts(&self) -> Result<JobStateCounts, StoreError> {
        self.inner.counts().await
    }

    async fn failed(&self, limit: usize) -> Result<Vec<DeliveryJob>, StoreError> {
        self.inner.failed(limit).await
    }
}
