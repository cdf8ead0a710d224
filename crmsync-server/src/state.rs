//! Application state shared across all request handlers, and the wiring
//! that builds it from the runtime configuration.

use crate::config::runtime::RuntimeConfig;
use crmsync_core::collaborators::{AnalyticsSink, CrmSource, HttpCrmClient, HttpSinkClient};
use crmsync_core::config::{IntakeSettings, SharedConfig};
use crmsync_core::crm::ObjectStore;
use crmsync_core::events::{ChangeEventReceiver, change_event_channel};
use crmsync_core::framework::DatabaseProcessor;
use crmsync_core::metrics::{DeliveryMetrics, PipelineMetrics};
use crmsync_core::processors::{
    ConsumerIntake, DeliveryTransport, EventDispatcher, EventPublisher, HealthTracker,
    RetryWorker, WorkerPool,
};
use crmsync_core::registry::SubscriptionRegistry;
use crmsync_core::store::{
    EventStore, JobStore, MemoryEventStore, MemoryJobStore, MemorySubscriptionStore,
    PgEventStore, PgJobStore, PgSubscriptionStore, RetentionPolicy, SubscriptionStore,
};
use sqlx::PgPool;
use std::sync::Arc;

/// Application state that is shared across all request handlers.
///
/// This is cloneable and cheap to pass around (everything is behind Arc).
#[derive(Clone)]
pub struct AppState {
    pub registry: SubscriptionRegistry,
    pub publisher: EventPublisher,
    pub delivery_metrics: Arc<DeliveryMetrics>,
    /// Embedded CRM simulator.
    pub objects: Arc<ObjectStore>,
    /// Hot-reloadable sections, swapped on SIGHUP.
    pub config: SharedConfig,
    pub consumer: Option<ConsumerState>,
}

/// Handles used by the consumer routes.
#[derive(Clone)]
pub struct ConsumerState {
    pub intake: ConsumerIntake,
    pub jobs: Arc<dyn JobStore>,
    pub metrics: Arc<PipelineMetrics>,
}

/// Backing stores of the pipeline.
pub struct Stores {
    pub subscriptions: Arc<dyn SubscriptionStore>,
    pub events: Arc<dyn EventStore>,
    pub jobs: Arc<dyn JobStore>,
}

impl Stores {
    pub fn memory(retention: RetentionPolicy) -> Self {
        Self {
            subscriptions: Arc::new(MemorySubscriptionStore::new()),
            events: Arc::new(MemoryEventStore::new(retention)),
            jobs: Arc::new(MemoryJobStore::new()),
        }
    }

    pub fn postgres(pool: PgPool, retention: RetentionPolicy) -> Self {
        let db = DatabaseProcessor::new(pool);
        Self {
            subscriptions: Arc::new(PgSubscriptionStore::new(db.clone())),
            events: Arc::new(PgEventStore::new(db.clone(), retention)),
            jobs: Arc::new(PgJobStore::new(db)),
        }
    }
}

/// Everything `main` needs to run: the router state plus the processors to spawn.
pub struct Pipeline {
    pub state: AppState,
    pub dispatcher: EventDispatcher,
    pub change_events: ChangeEventReceiver,
    pub worker_pool: Option<WorkerPool>,
}

impl AppState {
    /// Wire stores, clients and processors together.
    pub fn assemble(
        config: &RuntimeConfig,
        stores: Stores,
        transport: Arc<dyn DeliveryTransport>,
    ) -> anyhow::Result<Pipeline> {
        let (event_tx, change_events) = change_event_channel();
        let objects = Arc::new(ObjectStore::new(event_tx));

        let registry = SubscriptionRegistry::new(stores.subscriptions.clone());
        let delivery_metrics = Arc::new(DeliveryMetrics::default());
        let publisher = EventPublisher::new(
            registry.clone(),
            stores.events,
            transport,
            HealthTracker::new(stores.subscriptions, config.broker.failure_threshold),
            delivery_metrics.clone(),
        );
        let dispatcher = EventDispatcher::new(publisher.clone());

        let intake_settings = config
            .consumer
            .as_ref()
            .map(|c| c.intake.clone())
            .unwrap_or_else(|| IntakeSettings::new(Vec::<u8>::new()));
        let shared = SharedConfig::new(config.retry.clone(), intake_settings);

        let (consumer, worker_pool) = match &config.consumer {
            Some(consumer_config) => {
                let metrics = Arc::new(PipelineMetrics::default());
                let crm: Arc<dyn CrmSource> = match &config.crm.base_url {
                    Some(base_url) => Arc::new(HttpCrmClient::new(base_url.clone(), &config.crm)?),
                    None => objects.clone(),
                };
                let sink: Arc<dyn AnalyticsSink> =
                    Arc::new(HttpSinkClient::new(consumer_config.sink.clone())?);
                let worker = RetryWorker::new(
                    stores.jobs.clone(),
                    crm,
                    sink,
                    Arc::new(consumer_config.transformer()),
                    shared.retry.clone(),
                    metrics.clone(),
                );
                let intake = ConsumerIntake::new(
                    shared.intake.clone(),
                    shared.retry.clone(),
                    stores.jobs.clone(),
                    metrics.clone(),
                );
                (
                    Some(ConsumerState {
                        intake,
                        jobs: stores.jobs,
                        metrics,
                    }),
                    Some(WorkerPool::new(worker, consumer_config.pool)),
                )
            }
            None => (None, None),
        };

        Ok(Pipeline {
            state: AppState {
                registry,
                publisher,
                delivery_metrics,
                objects,
                config: shared,
                consumer,
            },
            dispatcher,
            change_events,
            worker_pool,
        })
    }
}
