//! Consumer intake and worker pool settings.

use std::time::Duration;

/// Settings the intake reads on every request; swapped on reload.
#[derive(Debug, Clone)]
pub struct IntakeSettings {
    /// Shared secret of the subscription that delivers to this consumer.
    pub secret: Box<[u8]>,
    pub verify_signatures: bool,
    /// Debug mode is the only mode in which verification may be skipped.
    pub debug: bool,
    pub processing_delay: Duration,
    pub coalesce: bool,
}

impl IntakeSettings {
    pub fn new(secret: impl Into<Box<[u8]>>) -> Self {
        Self {
            secret: secret.into(),
            verify_signatures: true,
            debug: false,
            processing_delay: Duration::from_secs(1),
            coalesce: true,
        }
    }

    pub fn secret_bytes(&self) -> &[u8] {
        &self.secret
    }

    /// Signatures are checked unless explicitly disabled in debug mode.
    pub fn requires_signature(&self) -> bool {
        self.verify_signatures || !self.debug
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerPoolConfig {
    pub workers: usize,
    /// Sleep between polls when no job is due.
    pub poll_interval: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            poll_interval: Duration::from_millis(250),
        }
    }
}
