//! Event Publisher.
//!
//! Records each accepted event for the retention window and fans it out to
//! every matching active subscription. All attempts of one event run
//! concurrently and are awaited together; one subscriber failing never
//! cancels or fails its siblings.

use super::delivery_client::DeliveryTransport;
use super::health_tracker::HealthTracker;
use crate::PipelineError;
use crate::entities::{ChangeEvent, Subscription};
use crate::metrics::DeliveryMetrics;
use crate::registry::SubscriptionRegistry;
use crate::store::EventStore;
use crmsync_sdk::objects::{IngressEvent, PublishResponse};
use futures_util::future::join_all;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryOutcome {
    pub subscription_id: Uuid,
    /// `None` when delivered.
    pub error: Option<String>,
}

/// Settled result of fanning out one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub event_id: String,
    pub succeeded: u32,
    pub failed: u32,
    /// In registration order of the matched subscriptions.
    pub deliveries: Vec<DeliveryOutcome>,
}

impl DeliveryReport {
    pub fn to_response(&self) -> PublishResponse {
        PublishResponse {
            event_id: self.event_id.clone(),
            notifications_sent: self.succeeded,
            notifications_failed: self.failed,
        }
    }
}

#[derive(Clone)]
pub struct EventPublisher {
    registry: SubscriptionRegistry,
    events: Arc<dyn EventStore>,
    transport: Arc<dyn DeliveryTransport>,
    health: HealthTracker,
    metrics: Arc<DeliveryMetrics>,
}

impl EventPublisher {
    pub fn new(
        registry: SubscriptionRegistry,
        events: Arc<dyn EventStore>,
        transport: Arc<dyn DeliveryTransport>,
        health: HealthTracker,
        metrics: Arc<DeliveryMetrics>,
    ) -> Self {
        Self {
            registry,
            events,
            transport,
            health,
            metrics,
        }
    }

    pub fn events(&self) -> &Arc<dyn EventStore> {
        &self.events
    }

    /// Validate an ingress body, then [`publish`](Self::publish) it.
    pub async fn publish_ingress(
        &self,
        body: IngressEvent,
    ) -> Result<DeliveryReport, PipelineError> {
        let event = ChangeEvent::from_ingress(body, OffsetDateTime::now_utc())?;
        self.publish(event).await
    }

    /// Record the event, then deliver it to every matching subscription.
    ///
    /// An event id that is already retained keeps its first record, and that
    /// record is what gets delivered, the same as a [`replay`](Self::replay).
    #[tracing::instrument(skip_all, fields(event_id = %event.event_id, event_type = %event.event_type))]
    pub async fn publish(&self, event: ChangeEvent) -> Result<DeliveryReport, PipelineError> {
        let now = OffsetDateTime::now_utc();
        if self.events.append(event.clone(), now).await? {
            return self.fan_out(&event).await;
        }
        debug!("Event id already retained, delivering the first record");
        // Pruned between append and get: nothing else is retained under the id.
        let retained = self.events.get(&event.event_id, now).await?.unwrap_or(event);
        self.fan_out(&retained).await
    }

    /// Deliver a retained event again to the subscriptions matching it now.
    #[tracing::instrument(skip(self))]
    pub async fn replay(&self, event_id: &str) -> Result<DeliveryReport, PipelineError> {
        let event = self
            .events
            .get(event_id, OffsetDateTime::now_utc())
            .await?
            .ok_or_else(|| PipelineError::not_found(format!("event {event_id}")))?;
        info!("Replaying retained event");
        self.fan_out(&event).await
    }

    async fn fan_out(&self, event: &ChangeEvent) -> Result<DeliveryReport, PipelineError> {
        let targets = self
            .registry
            .matching(&event.event_type, &event.object_type)
            .await?;
        let deliveries =
            join_all(targets.iter().map(|subscription| self.deliver_one(subscription, event)))
                .await;

        let succeeded = deliveries.iter().filter(|d| d.error.is_none()).count() as u32;
        let failed = deliveries.len() as u32 - succeeded;
        self.metrics.record(succeeded as u64, failed as u64);
        debug!(
            matched = deliveries.len(),
            succeeded, failed, "Fan-out settled"
        );
        Ok(DeliveryReport {
            event_id: event.event_id.clone(),
            succeeded,
            failed,
            deliveries,
        })
    }

    async fn deliver_one(&self, subscription: &Subscription, event: &ChangeEvent) -> DeliveryOutcome {
        let result = self.transport.deliver(subscription, event).await;
        let error = match result {
            Ok(()) => {
                if let Err(e) = self
                    .health
                    .record_success(subscription.id, OffsetDateTime::now_utc())
                    .await
                {
                    error!(subscription_id = %subscription.id, error = %e, "Failed to record delivery success");
                }
                None
            }
            Err(delivery_error) => {
                warn!(
                    subscription_id = %subscription.id,
                    url = %subscription.url,
                    error = %delivery_error,
                    "Delivery failed"
                );
                if let Err(e) = self.health.record_failure(subscription.id).await {
                    error!(subscription_id = %subscription.id, error = %e, "Failed to record delivery failure");
                }
                Some(delivery_error.to_string())
            }
        };
        DeliveryOutcome {
            subscription_id: subscription.id,
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processors::testing::{FakeTransport, broker, register};
    use crmsync_sdk::objects::IngressEvent;
    use std::collections::BTreeSet;

    fn event(n: usize) -> ChangeEvent {
        ChangeEvent {
            event_id: format!("evt-{n}"),
            event_type: "company.propertyChange".into(),
            object_type: "company".into(),
            object_id: n.to_string(),
            occurred_at: OffsetDateTime::UNIX_EPOCH,
            properties: None,
        }
    }

    #[tokio::test]
    async fn wildcard_subscription_gets_one_attempt_per_event() {
        let transport = Arc::new(FakeTransport::default());
        let (registry, publisher, _) = broker(transport.clone(), 10);
        let s = register(&registry, "http://all/hook", &["*"]).await;
        for n in 0..20 {
            publisher.publish(event(n)).await.unwrap();
        }
        assert_eq!(transport.attempts_for(s), 20);
        let stored = registry.store().get(s).await.unwrap().unwrap();
        assert_eq!(stored.success_count, 20);
        assert!(stored.last_notified_at.is_some());
    }

    #[tokio::test]
    async fn one_unreachable_subscriber_does_not_fail_the_rest() {
        let transport = Arc::new(FakeTransport::default().with_down("http://down/hook"));
        let (registry, publisher, metrics) = broker(transport.clone(), 10);
        register(&registry, "http://a/hook", &["company"]).await;
        let down = register(&registry, "http://down/hook", &["*"]).await;
        register(&registry, "http://b/hook", &["company.propertyChange"]).await;

        let report = publisher.publish(event(1)).await.unwrap();
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 1);
        let failed: Vec<_> = report
            .deliveries
            .iter()
            .filter(|d| d.error.is_some())
            .map(|d| d.subscription_id)
            .collect();
        assert_eq!(failed, vec![down]);
        assert_eq!(metrics.succeeded(), 2);
        assert_eq!(metrics.failed(), 1);
    }

    #[tokio::test]
    async fn deactivated_subscription_receives_nothing_more() {
        let transport = Arc::new(FakeTransport::default().with_down("http://down/hook"));
        let (registry, publisher, _) = broker(transport.clone(), 10);
        let down = register(&registry, "http://down/hook", &["*"]).await;
        for n in 0..11 {
            publisher.publish(event(n)).await.unwrap();
        }
        let stored = registry.store().get(down).await.unwrap().unwrap();
        assert_eq!(stored.error_count, 11);
        assert!(!stored.active);

        for n in 11..20 {
            let report = publisher.publish(event(n)).await.unwrap();
            assert!(report.deliveries.is_empty());
        }
        assert_eq!(transport.attempts_for(down), 11);
    }

    #[tokio::test]
    async fn replay_reproduces_matching_deliveries() {
        let transport = Arc::new(FakeTransport::default());
        let (registry, publisher, _) = broker(transport.clone(), 10);
        register(&registry, "http://a/hook", &["company"]).await;
        register(&registry, "http://b/hook", &["deal"]).await;
        register(&registry, "http://c/hook", &["*"]).await;

        let first = publisher.publish(event(7)).await.unwrap();
        let replayed = publisher.replay("evt-7").await.unwrap();
        let ids = |r: &DeliveryReport| {
            r.deliveries
                .iter()
                .map(|d| d.subscription_id)
                .collect::<BTreeSet<_>>()
        };
        assert_eq!(ids(&first), ids(&replayed));
        assert_eq!(replayed.succeeded, 2);
        assert_eq!(replayed.event_id, "evt-7");
    }

    #[tokio::test]
    async fn duplicate_event_id_delivers_the_first_record() {
        let transport = Arc::new(FakeTransport::default());
        let (registry, publisher, _) = broker(transport.clone(), 10);
        register(&registry, "http://a/hook", &["*"]).await;

        let mut first = event(3);
        first.properties = serde_json::json!({"name": "Acme"}).as_object().cloned();
        let mut second = first.clone();
        second.properties = serde_json::json!({"name": "Globex"}).as_object().cloned();

        publisher.publish(first.clone()).await.unwrap();
        let report = publisher.publish(second).await.unwrap();
        assert_eq!(report.succeeded, 1);
        publisher.replay("evt-3").await.unwrap();

        assert_eq!(transport.delivered(), vec![first.clone(), first.clone(), first]);
        let counts = publisher.events().count_by_type().await.unwrap();
        assert_eq!(counts["company.propertyChange"], 1);
    }

    #[tokio::test]
    async fn replay_of_unknown_event_is_not_found() {
        let (_, publisher, _) = broker(Arc::new(FakeTransport::default()), 10);
        assert!(matches!(
            publisher.replay("never-seen").await,
            Err(PipelineError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn malformed_ingress_is_rejected_before_recording() {
        let (_, publisher, _) = broker(Arc::new(FakeTransport::default()), 10);
        let body = IngressEvent {
            event_type: Some("company.creation".into()),
            object_type: Some("company".into()),
            ..Default::default()
        };
        assert!(matches!(
            publisher.publish_ingress(body).await,
            Err(PipelineError::Validation(_))
        ));
        assert!(publisher.events().count_by_type().await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_fan_out_counts_every_failure() {
        let transport = Arc::new(FakeTransport::default().with_flaky("http://flaky/hook"));
        let (registry, publisher, _) = broker(transport.clone(), 10);
        let mut ids = Vec::new();
        for host in ["a", "b", "c", "d"] {
            ids.push(register(&registry, &format!("http://{host}/hook"), &["*"]).await);
        }
        let flaky = register(&registry, "http://flaky/hook", &["*"]).await;

        let handles: Vec<_> = (0..100)
            .map(|n| {
                let publisher = publisher.clone();
                tokio::spawn(async move { publisher.publish(event(n)).await })
            })
            .collect();
        let mut reported_failures = 0;
        for handle in handles {
            reported_failures += handle.await.unwrap().unwrap().failed;
        }

        let observed = transport.failures_for(flaky);
        let stored = registry.store().get(flaky).await.unwrap().unwrap();
        assert_eq!(stored.error_count, observed);
        assert_eq!(reported_failures as u64, observed);
        assert_eq!(
            stored.success_count + stored.error_count,
            transport.attempts_for(flaky)
        );
        for id in ids {
            let s = registry.store().get(id).await.unwrap().unwrap();
            assert_eq!(s.success_count, 100);
            assert_eq!(s.error_count, 0);
        }
    }
}
