//! Subscription Registry.

use crate::PipelineError;
use crate::entities::Subscription;
use crate::matcher::parse_patterns;
use crate::store::SubscriptionStore;
use crate::utils::secret::generate_secret;
use crmsync_sdk::objects::RegisterSubscriptionRequest;
use serde_json::Value;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::info;
use url::Url;
use uuid::Uuid;

/// A new subscription, plus its secret when the registry generated it.
#[derive(Debug, Clone)]
pub struct Registered {
    pub subscription: Subscription,
    pub generated_secret: Option<String>,
}

#[derive(Clone)]
pub struct SubscriptionRegistry {
    store: Arc<dyn SubscriptionStore>,
}

impl SubscriptionRegistry {
    pub fn new(store: Arc<dyn SubscriptionStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn SubscriptionStore> {
        &self.store
    }

    /// Validate and persist a registration.
    ///
    /// `url` must be an absolute http(s) URL and `events` a non-empty array
    /// of non-empty strings. Without a secret a random one is generated.
    pub async fn register(
        &self,
        request: RegisterSubscriptionRequest,
        now: OffsetDateTime,
    ) -> Result<Registered, PipelineError> {
        let url = validate_url(request.url.as_deref())?;
        let patterns = match request.events {
            Some(Value::Array(items)) => {
                let raw = items
                    .iter()
                    .map(|item| {
                        item.as_str()
                            .ok_or_else(|| PipelineError::validation("events must be strings"))
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                parse_patterns(raw).map_err(|e| PipelineError::validation(e.to_string()))?
            }
            Some(_) => return Err(PipelineError::validation("events must be a list")),
            None => return Err(PipelineError::validation("events is required")),
        };
        let (secret, generated_secret) = match request.secret.filter(|s| !s.is_empty()) {
            Some(secret) => (secret, None),
            None => {
                let secret = generate_secret();
                (secret.clone(), Some(secret))
            }
        };
        let subscription = Subscription::new(url, patterns, secret, now);
        self.store.put(subscription.clone()).await?;
        info!(
            subscription_id = %subscription.id,
            url = %subscription.url,
            events = ?subscription.pattern_strings(),
            "Subscription registered"
        );
        Ok(Registered {
            subscription,
            generated_secret,
        })
    }

    pub async fn list(&self) -> Result<Vec<Subscription>, PipelineError> {
        Ok(self.store.list().await?)
    }

    pub async fn deregister(&self, id: Uuid) -> Result<(), PipelineError> {
        if !self.store.delete(id).await? {
            return Err(PipelineError::not_found(format!("subscription {id}")));
        }
        info!(subscription_id = %id, "Subscription deregistered");
        Ok(())
    }

    /// Active subscriptions whose patterns match, in registration order.
    pub async fn matching(
        &self,
        event_type: &str,
        object_type: &str,
    ) -> Result<Vec<Subscription>, PipelineError> {
        let mut subscriptions = self.store.list().await?;
        subscriptions.retain(|s| s.matches(event_type, object_type));
        Ok(subscriptions)
    }
}

fn validate_url(raw: Option<&str>) -> Result<String, PipelineError> {
    let raw = raw
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .ok_or_else(|| PipelineError::validation("url is required"))?;
    let url = Url::parse(raw).map_err(|e| PipelineError::validation(format!("invalid url: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(PipelineError::validation("url must use http or https"));
    }
    Ok(url.into())
}
