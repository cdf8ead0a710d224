//! Publisher side settings.

use crate::entities::subscription::DEFAULT_FAILURE_THRESHOLD;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrokerConfig {
    /// Bound on one delivery attempt.
    pub delivery_timeout: Duration,
    /// A subscription is deactivated once its error count exceeds this.
    pub failure_threshold: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            delivery_timeout: Duration::from_secs(30),
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
        }
    }
}
