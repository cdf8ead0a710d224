//! Retry Queue / Worker Pool.
//!
//! Per job state machine:
//!
//! ```text
//! Pending(visible_at) -> Processing -> Done (row deleted)
//!                                   -> Pending(now + backoff, attempts + 1)
//!                                   -> Failed (terminal, kept for operators)
//! ```
//!
//! A worker claims one due job at a time; the store guarantees a claimed job
//! is not handed to another worker until the claim timeout runs out. A claim
//! whose worker never reported back is picked up again after that. Processing is:
//!
//! 1. fetch the object from the CRM when the job asks for it or its partial
//!    properties do not cover the mapping (a missing object ends the job),
//! 2. map it into sink data points,
//! 3. push the batch to the sink.
//!
//! Transient failures are retried with exponential backoff until the job's
//! attempt budget is spent. Rejections (401, 4xx) fail the job at once.
//! Delivery to the sink is at-least-once and not ordered per object.

use crate::PipelineError;
use crate::collaborators::{AnalyticsSink, CollaboratorError, CrmSource};
use crate::config::{ConfigStore, RetryPolicy, WorkerPoolConfig};
use crate::entities::DeliveryJob;
use crate::metrics::PipelineMetrics;
use crate::store::{JobStore, StoreError};
use crate::transform::RecordTransformer;
use crate::utils::calendar::saturating_after;
use std::borrow::Cow;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// What happened to a claimed job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Pushed to the sink (possibly zero points) and removed.
    Done { points: usize },
    /// The object no longer exists in the CRM; removed without a sink write.
    SkippedDeleted,
    Retrying {
        attempts: u32,
        visible_at: OffsetDateTime,
    },
    Failed { attempts: u32 },
}

enum Step {
    Pushed(usize),
    Deleted,
}

#[derive(Clone)]
pub struct RetryWorker {
    jobs: Arc<dyn JobStore>,
    crm: Arc<dyn CrmSource>,
    sink: Arc<dyn AnalyticsSink>,
    transformer: Arc<RecordTransformer>,
    retry: ConfigStore<RetryPolicy>,
    metrics: Arc<PipelineMetrics>,
}

impl RetryWorker {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        crm: Arc<dyn CrmSource>,
        sink: Arc<dyn AnalyticsSink>,
        transformer: Arc<RecordTransformer>,
        retry: ConfigStore<RetryPolicy>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            jobs,
            crm,
            sink,
            transformer,
            retry,
            metrics,
        }
    }

    /// Claim and process at most one job that is due at `now`.
    ///
    /// A store error after the claim leaves the job `processing`; it becomes
    /// claimable again once the claim timeout has passed.
    pub async fn tick(
        &self,
        now: OffsetDateTime,
    ) -> Result<Option<(i64, JobOutcome)>, StoreError> {
        let lease_until = saturating_after(now, self.retry.read().await.claim_timeout);
        let Some(job) = self.jobs.claim_due(now, lease_until).await? else {
            return Ok(None);
        };
        let outcome = self.process_job(&job, now).await?;
        Ok(Some((job.id, outcome)))
    }

    #[tracing::instrument(
        skip_all,
        fields(job_id = job.id, object_type = %job.object_type, object_id = %job.object_id, attempt = job.attempts + 1)
    )]
    async fn process_job(
        &self,
        job: &DeliveryJob,
        now: OffsetDateTime,
    ) -> Result<JobOutcome, StoreError> {
        match self.execute(job).await {
            Ok(Step::Pushed(points)) => {
                self.jobs.complete(job.id).await?;
                self.metrics.job_succeeded(points);
                debug!(points, "Job done");
                Ok(JobOutcome::Done { points })
            }
            Ok(Step::Deleted) => {
                self.jobs.complete(job.id).await?;
                self.metrics.job_skipped_deleted();
                info!("Object no longer exists, job dropped without sink write");
                Ok(JobOutcome::SkippedDeleted)
            }
            Err(e) => self.handle_failure(job, e, now).await,
        }
    }

    async fn execute(&self, job: &DeliveryJob) -> Result<Step, CollaboratorError> {
        let properties = match &job.properties {
            Some(p) if !job.force_fetch && self.transformer.covers(&job.object_type, p) => {
                Cow::Borrowed(p)
            }
            _ => {
                match self
                    .crm
                    .fetch_object(&job.object_type, &job.object_id)
                    .await?
                {
                    Some(fetched) => Cow::Owned(fetched),
                    None => return Ok(Step::Deleted),
                }
            }
        };
        let points = self.transformer.transform(
            &job.object_type,
            &job.object_id,
            &properties,
            job.occurred_at,
        );
        if points.is_empty() {
            debug!("No mapped metrics in object, nothing to push");
            return Ok(Step::Pushed(0));
        }
        let count = points.len();
        self.sink.push(&self.transformer.batch(points)).await?;
        Ok(Step::Pushed(count))
    }

    async fn handle_failure(
        &self,
        job: &DeliveryJob,
        e: CollaboratorError,
        now: OffsetDateTime,
    ) -> Result<JobOutcome, StoreError> {
        let attempts = job.attempts + 1;
        let last_error = e.to_string();
        if e.is_transient() && attempts < job.max_attempts {
            let delay = self.retry.read().await.backoff(attempts);
            let visible_at = saturating_after(now, delay);
            self.jobs
                .reschedule(job.id, attempts, visible_at, last_error)
                .await?;
            self.metrics.job_retried();
            warn!(
                error = %e,
                attempts,
                max_attempts = job.max_attempts,
                retry_in_ms = delay.as_millis() as u64,
                "Job failed, retrying"
            );
            return Ok(JobOutcome::Retrying {
                attempts,
                visible_at,
            });
        }

        self.jobs.fail(job.id, attempts, last_error.clone()).await?;
        self.metrics.job_failed();
        if e.is_transient() {
            let exhausted = PipelineError::ExhaustedRetries {
                job_id: job.id,
                attempts,
                last_error,
            };
            error!(error = %exhausted, "Job moved to failed");
        } else {
            error!(error = %e, attempts, "Job rejected, moved to failed");
        }
        Ok(JobOutcome::Failed { attempts })
    }

    /// Keep ticking until nothing is due at `now`.
    pub async fn drain(&self, now: OffsetDateTime) -> Result<Vec<(i64, JobOutcome)>, StoreError> {
        let mut outcomes = Vec::new();
        while let Some(outcome) = self.tick(now).await? {
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    async fn run(self, index: usize, mut shutdown_rx: watch::Receiver<bool>, config: WorkerPoolConfig) {
        debug!(worker = index, "Worker started");
        loop {
            if *shutdown_rx.borrow() {
                break;
            }
            let idle = match self.tick(OffsetDateTime::now_utc()).await {
                Ok(Some(_)) => false,
                Ok(None) => true,
                Err(e) => {
                    error!(worker = index, error = %e, "Job store error");
                    true
                }
            };
            if !idle {
                continue;
            }
            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => {}
                _ = tokio::time::sleep(config.poll_interval) => {}
            }
        }
        debug!(worker = index, "Worker stopped");
    }
}

/// N workers polling one job store.
pub struct WorkerPool {
    worker: RetryWorker,
    config: WorkerPoolConfig,
}

impl WorkerPool {
    pub fn new(worker: RetryWorker, config: WorkerPoolConfig) -> Self {
        Self { worker, config }
    }

    /// Resume abandoned jobs, then run workers until shutdown. A job being
    /// processed when shutdown fires is finished first.
    pub async fn run(self, shutdown_rx: watch::Receiver<bool>) {
        match self
            .worker
            .jobs
            .recover_processing(OffsetDateTime::now_utc())
            .await
        {
            Ok(0) => {}
            Ok(n) => info!(recovered = n, "Returned abandoned jobs to pending"),
            Err(e) => error!(error = %e, "Failed to recover abandoned jobs"),
        }

        let workers = self.config.workers.max(1);
        info!(workers, "WorkerPool started");
        let mut set = JoinSet::new();
        for index in 0..workers {
            set.spawn(
                self.worker
                    .clone()
                    .run(index, shutdown_rx.clone(), self.config),
            );
        }
        while set.join_next().await.is_some() {}
        info!("WorkerPool shutdown complete");
    }
}
