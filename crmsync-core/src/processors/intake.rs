//! Consumer Intake.
//!
//! Accepts deliveries addressed to the consumer's webhook endpoint, checks
//! their signature and freshness, and turns the embedded event into a
//! delayed job. The delay gives near-duplicate events for one object a
//! window to coalesce into a single job.

use crate::PipelineError;
use crate::config::{ConfigStore, IntakeSettings, RetryPolicy};
use crate::entities::{ChangeEvent, Enqueued, NewJob};
use crate::metrics::PipelineMetrics;
use crate::store::JobStore;
use crmsync_sdk::objects::{DeliveryPayload, unix_millis};
use crmsync_sdk::signature::{check_timestamp_at, verify_body};
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{debug, info};

#[derive(Clone)]
pub struct ConsumerIntake {
    settings: ConfigStore<IntakeSettings>,
    retry: ConfigStore<RetryPolicy>,
    jobs: Arc<dyn JobStore>,
    metrics: Arc<PipelineMetrics>,
}

impl ConsumerIntake {
    pub fn new(
        settings: ConfigStore<IntakeSettings>,
        retry: ConfigStore<RetryPolicy>,
        jobs: Arc<dyn JobStore>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            settings,
            retry,
            jobs,
            metrics,
        }
    }

    /// Verify, validate and enqueue one delivery body.
    ///
    /// Signature problems are `Auth`, a malformed body or event is
    /// `Validation`. Nothing is enqueued on either.
    #[tracing::instrument(skip_all)]
    pub async fn ingest(
        &self,
        signature: Option<&str>,
        body: &[u8],
        now: OffsetDateTime,
    ) -> Result<Enqueued, PipelineError> {
        let settings = self.settings.snapshot().await;
        if settings.requires_signature() {
            let header =
                signature.ok_or_else(|| PipelineError::Auth("missing signature header".into()))?;
            verify_body(header, body, settings.secret_bytes())
                .map_err(|e| PipelineError::Auth(e.to_string()))?;
        } else {
            debug!("Signature verification disabled in debug mode");
        }

        let payload: DeliveryPayload = serde_json::from_slice(body)
            .map_err(|e| PipelineError::validation(format!("malformed delivery: {e}")))?;
        if settings.requires_signature() {
            check_timestamp_at(payload.timestamp, unix_millis(now))
                .map_err(|e| PipelineError::Auth(e.to_string()))?;
        }
        let event = ChangeEvent::from_payload(payload.event)?;

        let max_attempts = self.retry.read().await.max_attempts;
        let job = NewJob::from_event(event, now, settings.processing_delay, max_attempts);
        let (event_id, object_type, object_id) =
            (job.event_id.clone(), job.object_type.clone(), job.object_id.clone());
        let enqueued = self.jobs.enqueue(job, settings.coalesce).await?;
        self.metrics.job_accepted(enqueued.coalesced);
        info!(
            job_id = enqueued.job_id,
            coalesced = enqueued.coalesced,
            event_id = %event_id,
            object_type = %object_type,
            object_id = %object_id,
            "Delivery accepted"
        );
        Ok(enqueued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::JobState;
    use crate::store::MemoryJobStore;
    use crmsync_sdk::objects::{ChangeEventPayload, unix_millis};
    use crmsync_sdk::signature::sign_body;
    use serde_json::json;
    use std::time::Duration;
    use uuid::Uuid;

    const SECRET: &[u8] = b"consumer-secret";

    fn intake(settings: IntakeSettings) -> (ConsumerIntake, Arc<MemoryJobStore>, Arc<PipelineMetrics>) {
        let jobs = Arc::new(MemoryJobStore::new());
        let metrics = Arc::new(PipelineMetrics::default());
        let intake = ConsumerIntake::new(
            ConfigStore::new(settings),
            ConfigStore::new(RetryPolicy::default()),
            jobs.clone(),
            metrics.clone(),
        );
        (intake, jobs, metrics)
    }

    fn body(object_id: &str, properties: Option<serde_json::Value>, timestamp: i64) -> Vec<u8> {
        serde_json::to_vec(&DeliveryPayload {
            subscription_id: Uuid::new_v4(),
            event: ChangeEventPayload {
                event_id: format!("evt-{object_id}"),
                event_type: "company.propertyChange".into(),
                object_type: "company".into(),
                object_id: object_id.into(),
                occurred_at: timestamp,
                properties: properties.and_then(|p| p.as_object().cloned()),
            },
            timestamp,
        })
        .unwrap()
    }

    fn fresh() -> i64 {
        unix_millis(OffsetDateTime::now_utc())
    }

    #[tokio::test]
    async fn signed_delivery_is_enqueued_after_delay() {
        let (intake, jobs, metrics) = intake(IntakeSettings::new(SECRET));
        let body = body("42", Some(json!({"name": "Acme"})), fresh());
        let now = OffsetDateTime::now_utc();
        let enqueued = intake
            .ingest(Some(&sign_body(&body, SECRET)), &body, now)
            .await
            .unwrap();
        let job = jobs.get(enqueued.job_id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Pending);
        assert_eq!(job.visible_at, now + Duration::from_secs(1));
        assert_eq!(job.max_attempts, 3);
        assert!(!job.force_fetch);
        assert_eq!(metrics.snapshot().jobs_accepted, 1);
    }

    #[tokio::test]
    async fn bad_or_missing_signature_is_auth_error() {
        let (intake, jobs, _) = intake(IntakeSettings::new(SECRET));
        let body = body("42", None, fresh());
        let now = OffsetDateTime::now_utc();
        for header in [None, Some(sign_body(&body, b"wrong")), Some("v1=zz".to_owned())] {
            assert!(matches!(
                intake.ingest(header.as_deref(), &body, now).await,
                Err(PipelineError::Auth(_))
            ));
        }
        assert_eq!(jobs.counts().await.unwrap().pending, 0);
    }

    #[tokio::test]
    async fn stale_or_future_delivery_is_rejected() {
        let (intake, jobs, _) = intake(IntakeSettings::new(SECRET));
        for timestamp in [fresh() - 10 * 60 * 1000, fresh() + 10 * 60 * 1000, i64::MIN] {
            let body = body("42", None, timestamp);
            let result = intake
                .ingest(Some(&sign_body(&body, SECRET)), &body, OffsetDateTime::now_utc())
                .await;
            assert!(matches!(result, Err(PipelineError::Auth(_))));
        }
        assert_eq!(jobs.counts().await.unwrap().pending, 0);
    }

    #[tokio::test]
    async fn verification_can_only_be_skipped_in_debug_mode() {
        let body = body("42", None, fresh());
        let now = OffsetDateTime::now_utc();

        let (strict, _, _) = intake(IntakeSettings {
            verify_signatures: false,
            ..IntakeSettings::new(SECRET)
        });
        assert!(matches!(
            strict.ingest(None, &body, now).await,
            Err(PipelineError::Auth(_))
        ));

        let (debug, _, _) = intake(IntakeSettings {
            verify_signatures: false,
            debug: true,
            ..IntakeSettings::new(SECRET)
        });
        assert!(debug.ingest(None, &body, now).await.is_ok());
    }

    #[tokio::test]
    async fn event_without_object_id_is_validation_error() {
        let (intake, _, _) = intake(IntakeSettings::new(SECRET));
        let raw = serde_json::to_vec(&json!({
            "subscriptionId": Uuid::new_v4(),
            "event": {
                "eventId": "e", "eventType": "company.creation",
                "objectType": "company", "objectId": "", "occurredAt": 0
            },
            "timestamp": fresh()
        }))
        .unwrap();
        let result = intake
            .ingest(Some(&sign_body(&raw, SECRET)), &raw, OffsetDateTime::now_utc())
            .await;
        assert!(matches!(result, Err(PipelineError::Validation(_))));

        let garbage = b"not json".to_vec();
        let result = intake
            .ingest(Some(&sign_body(&garbage, SECRET)), &garbage, OffsetDateTime::now_utc())
            .await;
        assert!(matches!(result, Err(PipelineError::Validation(_))));
    }

    #[tokio::test]
    async fn burst_for_one_object_coalesces() {
        let (intake, jobs, metrics) = intake(IntakeSettings::new(SECRET));
        let now = OffsetDateTime::now_utc();
        let mut ids = Vec::new();
        for props in [json!({"name": "A"}), json!({"industry": "retail"}), json!({"name": "B"})] {
            let body = body("42", Some(props), fresh());
            let e = intake
                .ingest(Some(&sign_body(&body, SECRET)), &body, now)
                .await
                .unwrap();
            ids.push(e);
        }
        assert!(!ids[0].coalesced);
        assert!(ids[1].coalesced && ids[2].coalesced);
        assert_eq!(jobs.counts().await.unwrap().pending, 1);
        let job = jobs.get(ids[0].job_id).await.unwrap().unwrap();
        assert_eq!(
            job.properties,
            json!({"name": "B", "industry": "retail"}).as_object().cloned()
        );
        let counters = metrics.snapshot();
        assert_eq!(counters.jobs_accepted, 3);
        assert_eq!(counters.jobs_coalesced, 2);
    }

    #[tokio::test]
    async fn coalescing_can_be_disabled() {
        let (intake, jobs, _) = intake(IntakeSettings {
            coalesce: false,
            ..IntakeSettings::new(SECRET)
        });
        let now = OffsetDateTime::now_utc();
        for _ in 0..2 {
            let body = body("42", None, fresh());
            intake
                .ingest(Some(&sign_body(&body, SECRET)), &body, now)
                .await
                .unwrap();
        }
        assert_eq!(jobs.counts().await.unwrap().pending, 2);
    }
}
