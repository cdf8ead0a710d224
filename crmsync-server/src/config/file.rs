//! TOML file configuration structures.
//!
//! These structs directly map to the `crmsync-config.toml` file format.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;

/// Root configuration structure as read from the TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub consumer: ConsumerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub crm: CrmConfig,
    pub sink: Option<SinkConfig>,
    /// Record to metric mappings. Empty means the built-in company and deal mappings.
    #[serde(default)]
    pub mappings: Vec<MappingConfig>,
}

/// Server configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// The address and port to listen on (e.g., "0.0.0.0:8080").
    #[serde(default = "default_listen_addr")]
    pub listen: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub event_retention_secs: u64,
    pub max_retained_events: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            event_retention_secs: 24 * 60 * 60,
            max_retained_events: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub delivery_timeout_secs: u64,
    pub failure_threshold: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            delivery_timeout_secs: 30,
            failure_threshold: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    pub enabled: bool,
    /// Secret of the subscription delivering to `/consumer/webhook`.
    pub secret: String,
    pub processing_delay_ms: u64,
    pub coalesce: bool,
    pub verify_signatures: bool,
    pub debug: bool,
    pub workers: usize,
    pub poll_interval_ms: u64,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            secret: String::new(),
            processing_delay_ms: 1000,
            coalesce: true,
            verify_signatures: true,
            debug: false,
            workers: 4,
            poll_interval_ms: 250,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    /// A job left `processing` this long is handed to another worker.
    pub claim_timeout_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 2000,
            multiplier: 2.0,
            max_delay_ms: 60_000,
            claim_timeout_ms: 5 * 60 * 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrmConfig {
    /// Remote CRM API. Absent means the embedded object store.
    pub base_url: Option<url::Url>,
    pub fetch_timeout_secs: u64,
}

impl Default for CrmConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            fetch_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    pub url: url::Url,
    pub token: String,
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(default = "default_push_timeout")]
    pub push_timeout_secs: u64,
    #[serde(default)]
    pub metric_prefix: String,
}

fn default_source() -> String {
    "crm-sync".to_string()
}

fn default_push_timeout() -> u64 {
    15
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingConfig {
    pub object_type: String,
    /// Source property -> metric name.
    pub metrics: BTreeMap<String, String>,
    #[serde(default)]
    pub attributes: Vec<String>,
}
