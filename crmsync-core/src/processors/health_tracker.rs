//! Subscriber Health Tracker.
//!
//! The single owner of subscription counters. Deliveries report their
//! outcome here; each report is one atomic store update, so concurrent
//! fan-outs never lose an increment.

use crate::entities::{FailureRecorded, Subscription};
use crate::store::{StoreError, SubscriptionStore};
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::warn;
use uuid::Uuid;

#[derive(Clone)]
pub struct HealthTracker {
    store: Arc<dyn SubscriptionStore>,
    failure_threshold: u64,
}

impl HealthTracker {
    pub fn new(store: Arc<dyn SubscriptionStore>, failure_threshold: u64) -> Self {
        Self {
            store,
            failure_threshold,
        }
    }

    pub async fn record_success(
        &self,
        id: Uuid,
        at: OffsetDateTime,
    ) -> Result<Option<Subscription>, StoreError> {
        self.store.record_success(id, at).await
    }

    /// Count a failure. The subscription is switched off for good once its
    /// error count passes the threshold; only re-registration brings it back.
    pub async fn record_failure(&self, id: Uuid) -> Result<Option<FailureRecorded>, StoreError> {
        let recorded = self.store.record_failure(id, self.failure_threshold).await?;
        if let Some(r) = &recorded
            && r.deactivated
        {
            warn!(
                subscription_id = %id,
                url = %r.subscription.url,
                error_count = r.subscription.error_count,
                threshold = self.failure_threshold,
                "Subscription deactivated after repeated delivery failures"
            );
        }
        Ok(recorded)
    }
}
