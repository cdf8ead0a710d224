//! Process-wide counters surfaced by the stats endpoints.

use crmsync_sdk::objects::PipelineCounters;
use std::sync::atomic::{AtomicU64, Ordering};

/// Outcome counters of broker deliveries.
#[derive(Debug, Default)]
pub struct DeliveryMetrics {
    succeeded: AtomicU64,
    failed: AtomicU64,
}

impl DeliveryMetrics {
    pub fn record(&self, succeeded: u64, failed: u64) {
        self.succeeded.fetch_add(succeeded, Ordering::Relaxed);
        self.failed.fetch_add(failed, Ordering::Relaxed);
    }

    pub fn succeeded(&self) -> u64 {
        self.succeeded.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

/// Consumer side counters.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    jobs_accepted: AtomicU64,
    jobs_coalesced: AtomicU64,
    jobs_succeeded: AtomicU64,
    jobs_retried: AtomicU64,
    jobs_failed: AtomicU64,
    jobs_skipped_deleted: AtomicU64,
    points_pushed: AtomicU64,
}

impl PipelineMetrics {
    pub fn job_accepted(&self, coalesced: bool) {
        self.jobs_accepted.fetch_add(1, Ordering::Relaxed);
        if coalesced {
            self.jobs_coalesced.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn job_succeeded(&self, points: usize) {
        self.jobs_succeeded.fetch_add(1, Ordering::Relaxed);
        self.points_pushed
            .fetch_add(points as u64, Ordering::Relaxed);
    }

    pub fn job_retried(&self) {
        self.jobs_retried.fetch_add(1, Ordering::Relaxed);
    }

    pub fn job_failed(&self) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn job_skipped_deleted(&self) {
        self.jobs_skipped_deleted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PipelineCounters {
        PipelineCounters {
            jobs_accepted: self.jobs_accepted.load(Ordering::Relaxed),
            jobs_coalesced: self.jobs_coalesced.load(Ordering::Relaxed),
            jobs_succeeded: self.jobs_succeeded.load(Ordering::Relaxed),
            jobs_retried: self.jobs_retried.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            jobs_skipped_deleted: self.jobs_skipped_deleted.load(Ordering::Relaxed),
            points_pushed: self.points_pushed.load(Ordering::Relaxed),
        }
    }
}
