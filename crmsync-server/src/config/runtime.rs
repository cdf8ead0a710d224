//! Validated configuration in the types the core processors run with.

use crate::config::file::{self, FileConfig, StorageBackend};
use crmsync_core::config::{
    BrokerConfig, CrmConfig, IntakeSettings, RetryPolicy, SinkConfig, WorkerPoolConfig,
};
use crmsync_core::store::RetentionPolicy;
use crmsync_core::transform::{FieldMapping, RecordTransformer, default_mappings};
use std::net::SocketAddr;
use std::time::Duration;

/// Consumer side of the process; absent when `[consumer] enabled = false`.
#[derive(Debug, Clone)]
pub struct ConsumerRuntime {
    pub intake: IntakeSettings,
    pub pool: WorkerPoolConfig,
    pub sink: SinkConfig,
    pub metric_prefix: String,
    pub mappings: Vec<FieldMapping>,
}

impl ConsumerRuntime {
    pub fn transformer(&self) -> RecordTransformer {
        RecordTransformer::new(
            self.mappings.iter().cloned(),
            self.metric_prefix.clone(),
            self.sink.source.clone(),
        )
    }
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub listen: SocketAddr,
    pub backend: StorageBackend,
    pub retention: RetentionPolicy,
    pub broker: BrokerConfig,
    pub retry: RetryPolicy,
    pub crm: CrmConfig,
    pub consumer: Option<ConsumerRuntime>,
}

impl RuntimeConfig {
    /// Convert an already validated file config.
    pub(super) fn from_file(config: FileConfig) -> Self {
        let consumer = match (config.consumer.enabled, config.sink) {
            (true, Some(sink)) => Some(ConsumerRuntime {
                intake: intake_settings(&config.consumer),
                pool: WorkerPoolConfig {
                    workers: config.consumer.workers,
                    poll_interval: Duration::from_millis(config.consumer.poll_interval_ms),
                },
                metric_prefix: sink.metric_prefix.clone(),
                sink: SinkConfig {
                    url: sink.url,
                    token: sink.token,
                    source: sink.source,
                    push_timeout: Duration::from_secs(sink.push_timeout_secs),
                },
                mappings: if config.mappings.is_empty() {
                    default_mappings()
                } else {
                    config.mappings.into_iter().map(convert_mapping).collect()
                },
            }),
            _ => None,
        };

        Self {
            listen: config.server.listen,
            backend: config.storage.backend,
            retention: RetentionPolicy {
                window: Duration::from_secs(config.storage.event_retention_secs),
                max_events: config.storage.max_retained_events,
            },
            broker: BrokerConfig {
                delivery_timeout: Duration::from_secs(config.broker.delivery_timeout_secs),
                failure_threshold: config.broker.failure_threshold,
            },
            retry: RetryPolicy {
                max_attempts: config.retry.max_attempts,
                base_delay: Duration::from_millis(config.retry.base_delay_ms),
                multiplier: config.retry.multiplier,
                max_delay: Duration::from_millis(config.retry.max_delay_ms),
                claim_timeout: Duration::from_millis(config.retry.claim_timeout_ms),
            },
            crm: CrmConfig {
                base_url: config.crm.base_url,
                fetch_timeout: Duration::from_secs(config.crm.fetch_timeout_secs),
            },
            consumer,
        }
    }
}

fn intake_settings(c: &file::ConsumerConfig) -> IntakeSettings {
    IntakeSettings {
        verify_signatures: c.verify_signatures,
        debug: c.debug,
        processing_delay: Duration::from_millis(c.processing_delay_ms),
        coalesce: c.coalesce,
        ..IntakeSettings::new(c.secret.clone().into_bytes().into_boxed_slice())
    }
}

fn convert_mapping(m: file::MappingConfig) -> FieldMapping {
    FieldMapping {
        object_type: m.object_type.as_str().into(),
        metrics: m.metrics.into_iter().collect(),
        attributes: m.attributes,
    }
}
