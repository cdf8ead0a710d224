//! Runtime configuration types.
//!
//! These are the validated values the processors run with. Loading and
//! validating the TOML file is the server crate's job.

mod broker;
mod collaborators;
mod config_store;
mod consumer;
mod retry;

pub use broker::BrokerConfig;
pub use collaborators::{CrmConfig, SinkConfig};
pub use config_store::ConfigStore;
pub use consumer::{IntakeSettings, WorkerPoolConfig};
pub use retry::RetryPolicy;

/// Sections that can be swapped at runtime without a restart.
#[derive(Clone)]
pub struct SharedConfig {
    pub retry: ConfigStore<RetryPolicy>,
    pub intake: ConfigStore<IntakeSettings>,
}

impl SharedConfig {
    pub fn new(retry: RetryPolicy, intake: IntakeSettings) -> Self {
        Self {
            retry: ConfigStore::new(retry),
            intake: ConfigStore::new(intake),
        }
    }
}
