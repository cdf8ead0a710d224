use crate::entities::ChangeEvent;
use crate::framework::DatabaseProcessor;
use crate::utils::calendar::saturating_after;
use compact_str::CompactString;
use crmsync_sdk::objects::{JobView, unix_millis};
use kanau::processor::Processor;
use serde_json::{Map, Value};
use sqlx::types::Json;
use time::OffsetDateTime;

/// Persisted job states. A finished job is deleted rather than stored as done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(rename_all = "lowercase", type_name = "job_state")]
pub enum JobState {
    Pending,
    Processing,
    Failed,
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Pending => write!(f, "pending"),
            JobState::Processing => write!(f, "processing"),
            JobState::Failed => write!(f, "failed"),
        }
    }
}

/// A unit of consumer work derived from one (or several coalesced) events.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryJob {
    pub id: i64,
    pub event_id: String,
    pub event_type: CompactString,
    pub object_type: CompactString,
    pub object_id: String,
    pub properties: Option<Map<String, Value>>,
    /// The authoritative object must be fetched before transforming.
    pub force_fetch: bool,
    pub occurred_at: OffsetDateTime,
    pub enqueued_at: OffsetDateTime,
    /// Next run while `pending`; end of the claim lease while `processing`.
    pub visible_at: OffsetDateTime,
    pub attempts: u32,
    pub max_attempts: u32,
    pub state: JobState,
    pub last_error: Option<String>,
}

impl DeliveryJob {
    pub fn to_view(&self) -> JobView {
        JobView {
            id: self.id,
            event_type: self.event_type.to_string(),
            object_type: self.object_type.to_string(),
            object_id: self.object_id.clone(),
            state: self.state.to_string(),
            attempts: self.attempts,
            max_attempts: self.max_attempts,
            enqueued_at: unix_millis(self.enqueued_at),
            visible_at: unix_millis(self.visible_at),
            last_error: self.last_error.clone(),
        }
    }
}

/// A job about to be enqueued.
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub event_id: String,
    pub event_type: CompactString,
    pub object_type: CompactString,
    pub object_id: String,
    pub properties: Option<Map<String, Value>>,
    pub force_fetch: bool,
    pub occurred_at: OffsetDateTime,
    pub enqueued_at: OffsetDateTime,
    pub visible_at: OffsetDateTime,
    pub max_attempts: u32,
}

impl NewJob {
    pub fn from_event(
        event: ChangeEvent,
        now: OffsetDateTime,
        delay: std::time::Duration,
        max_attempts: u32,
    ) -> Self {
        let force_fetch = event.properties.is_none() || event.is_creation();
        Self {
            event_id: event.event_id,
            event_type: event.event_type,
            object_type: event.object_type,
            object_id: event.object_id,
            properties: event.properties,
            force_fetch,
            occurred_at: event.occurred_at,
            enqueued_at: now,
            visible_at: saturating_after(now, delay),
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn into_job(self, id: i64) -> DeliveryJob {
        DeliveryJob {
            id,
            event_id: self.event_id,
            event_type: self.event_type,
            object_type: self.object_type,
            object_id: self.object_id,
            properties: self.properties,
            force_fetch: self.force_fetch,
            occurred_at: self.occurred_at,
            enqueued_at: self.enqueued_at,
            visible_at: self.visible_at,
            attempts: 0,
            max_attempts: self.max_attempts,
            state: JobState::Pending,
            last_error: None,
        }
    }
}

/// Fold a newer event for the same object into a pending job.
///
/// The newest event id and type win, property maps are merged with the
/// newer values taking precedence, and a fetch requirement on either side
/// carries over. The visibility time is left alone so coalescing never
/// postpones work.
pub fn coalesce_into(job: &mut DeliveryJob, incoming: NewJob) {
    job.event_id = incoming.event_id;
    job.event_type = incoming.event_type;
    job.occurred_at = job.occurred_at.max(incoming.occurred_at);
    job.force_fetch |= incoming.force_fetch;
    job.properties = merge_properties(job.properties.take(), incoming.properties);
}

fn merge_properties(
    existing: Option<Map<String, Value>>,
    incoming: Option<Map<String, Value>>,
) -> Option<Map<String, Value>> {
    match (existing, incoming) {
        (Some(mut base), Some(newer)) => {
            base.extend(newer);
            Some(base)
        }
        (base, newer) => newer.or(base),
    }
}

/// Outcome of an enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Enqueued {
    pub job_id: i64,
    pub coalesced: bool,
}

// ---------------------------------------------------------------------------
// Postgres rows and queries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, sqlx::FromRow)]
struct DeliveryJobRow {
    id: i64,
    event_id: String,
    event_type: CompactString,
    object_type: CompactString,
    object_id: String,
    properties: Option<Json<Map<String, Value>>>,
    force_fetch: bool,
    occurred_at: OffsetDateTime,
    enqueued_at: OffsetDateTime,
    visible_at: OffsetDateTime,
    attempts: i32,
    max_attempts: i32,
    state: JobState,
    last_error: Option<String>,
}

impl From<DeliveryJobRow> for DeliveryJob {
    fn from(row: DeliveryJobRow) -> Self {
        Self {
            id: row.id,
            event_id: row.event_id,
            event_type: row.event_type,
            object_type: row.object_type,
            object_id: row.object_id,
            properties: row.properties.map(|Json(p)| p),
            force_fetch: row.force_fetch,
            occurred_at: row.occurred_at,
            enqueued_at: row.enqueued_at,
            visible_at: row.visible_at,
            attempts: row.attempts.max(0) as u32,
            max_attempts: row.max_attempts.max(1) as u32,
            state: row.state,
            last_error: row.last_error,
        }
    }
}

const JOB_COLUMNS: &str = "id, event_id, event_type, object_type, object_id, properties, \
    force_fetch, occurred_at, enqueued_at, visible_at, attempts, max_attempts, state, last_error";

#[derive(Debug, Clone)]
/// Merge into the oldest untouched pending job of the same object.
/// Returns the merged job id, or `None` when there is nothing to merge into.
pub struct CoalesceDeliveryJob {
    pub job: NewJob,
}

impl Processor<CoalesceDeliveryJob> for DatabaseProcessor {
    type Output = Option<i64>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:CoalesceDeliveryJob")]
    async fn process(&self, cmd: CoalesceDeliveryJob) -> Result<Option<i64>, sqlx::Error> {
        let j = cmd.job;
        sqlx::query_scalar::<_, i64>(
            r#"
            UPDATE delivery_jobs
            SET event_id = $3,
                event_type = $4,
                occurred_at = GREATEST(occurred_at, $5),
                properties = COALESCE(properties || $6::jsonb, $6::jsonb, properties),
                force_fetch = force_fetch OR $7
            WHERE id = (
                SELECT id FROM delivery_jobs
                WHERE object_type = $1 AND object_id = $2
                  AND state = 'pending' AND attempts = 0
                ORDER BY id ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id
            "#,
        )
        .bind(j.object_type.as_str())
        .bind(&j.object_id)
        .bind(&j.event_id)
        .bind(j.event_type.as_str())
        .bind(j.occurred_at)
        .bind(j.properties.as_ref().map(Json))
        .bind(j.force_fetch)
        .fetch_optional(&self.pool)
        .await
    }
}

#[derive(Debug, Clone)]
pub struct InsertDeliveryJob {
    pub job: NewJob,
}

impl Processor<InsertDeliveryJob> for DatabaseProcessor {
    type Output = i64;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:InsertDeliveryJob")]
    async fn process(&self, cmd: InsertDeliveryJob) -> Result<i64, sqlx::Error> {
        let j = cmd.job;
        sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO delivery_jobs
                (event_id, event_type, object_type, object_id, properties, force_fetch,
                 occurred_at, enqueued_at, visible_at, attempts, max_attempts, state)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 0, $10, 'pending')
            RETURNING id
            "#,
        )
        .bind(&j.event_id)
        .bind(j.event_type.as_str())
        .bind(j.object_type.as_str())
        .bind(&j.object_id)
        .bind(j.properties.as_ref().map(Json))
        .bind(j.force_fetch)
        .bind(j.occurred_at)
        .bind(j.enqueued_at)
        .bind(j.visible_at)
        .bind(j.max_attempts as i32)
        .fetch_one(&self.pool)
        .await
    }
}

#[derive(Debug, Clone)]
/// Atomically move the earliest due job to `processing`, hidden until
/// `lease_until`. A `processing` row whose lease ran out counts as due.
pub struct ClaimDueDeliveryJob {
    pub now: OffsetDateTime,
    pub lease_until: OffsetDateTime,
}

impl Processor<ClaimDueDeliveryJob> for DatabaseProcessor {
    type Output = Option<DeliveryJob>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:ClaimDueDeliveryJob")]
    async fn process(&self, cmd: ClaimDueDeliveryJob) -> Result<Option<DeliveryJob>, sqlx::Error> {
        let row = sqlx::query_as::<_, DeliveryJobRow>(&format!(
            r#"
            UPDATE delivery_jobs
            SET state = 'processing', visible_at = $2
            WHERE id = (
                SELECT id FROM delivery_jobs
                WHERE state IN ('pending', 'processing') AND visible_at <= $1
                ORDER BY visible_at ASC, id ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(cmd.now)
        .bind(cmd.lease_until)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }
}

#[derive(Debug, Clone)]
/// Remove a finished job.
pub struct DeleteDeliveryJob {
    pub id: i64,
}

impl Processor<DeleteDeliveryJob> for DatabaseProcessor {
    type Output = ();
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:DeleteDeliveryJob")]
    async fn process(&self, cmd: DeleteDeliveryJob) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM delivery_jobs WHERE id = $1")
            .bind(cmd.id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
/// Return a processing job to `pending` with a later visibility time.
pub struct RescheduleDeliveryJob {
    pub id: i64,
    pub attempts: u32,
    pub visible_at: OffsetDateTime,
    pub last_error: String,
}

impl Processor<RescheduleDeliveryJob> for DatabaseProcessor {
    type Output = ();
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:RescheduleDeliveryJob")]
    async fn process(&self, cmd: RescheduleDeliveryJob) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE delivery_jobs
            SET state = 'pending', attempts = $2, visible_at = $3, last_error = $4
            WHERE id = $1 AND state = 'processing'
            "#,
        )
        .bind(cmd.id)
        .bind(cmd.attempts as i32)
        .bind(cmd.visible_at)
        .bind(&cmd.last_error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
/// Move a processing job to the terminal `failed` state.
pub struct FailDeliveryJob {
    pub id: i64,
    pub attempts: u32,
    pub last_error: String,
}

impl Processor<FailDeliveryJob> for DatabaseProcessor {
    type Output = ();
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:FailDeliveryJob")]
    async fn process(&self, cmd: FailDeliveryJob) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE delivery_jobs
            SET state = 'failed', attempts = $2, last_error = $3
            WHERE id = $1
            "#,
        )
        .bind(cmd.id)
        .bind(cmd.attempts as i32)
        .bind(&cmd.last_error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
/// Return jobs left in `processing` by a previous process to `pending`.
pub struct RecoverProcessingDeliveryJobs {
    pub now: OffsetDateTime,
}

impl Processor<RecoverProcessingDeliveryJobs> for DatabaseProcessor {
    type Output = u64;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:RecoverProcessingDeliveryJobs")]
    async fn process(&self, cmd: RecoverProcessingDeliveryJobs) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE delivery_jobs
            SET state = 'pending', visible_at = LEAST(visible_at, $1)
            WHERE state = 'processing'
            "#,
        )
        .bind(cmd.now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[derive(Debug, Clone)]
pub struct GetDeliveryJob {
    pub id: i64,
}

impl Processor<GetDeliveryJob> for DatabaseProcessor {
    type Output = Option<DeliveryJob>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetDeliveryJob")]
    async fn process(&self, query: GetDeliveryJob) -> Result<Option<DeliveryJob>, sqlx::Error> {
        let row = sqlx::query_as::<_, DeliveryJobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM delivery_jobs WHERE id = $1"
        ))
        .bind(query.id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct JobStateCount {
    pub state: JobState,
    pub count: i64,
}

#[derive(Debug, Clone)]
pub struct CountDeliveryJobsByState;

impl Processor<CountDeliveryJobsByState> for DatabaseProcessor {
    type Output = Vec<JobStateCount>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:CountDeliveryJobsByState")]
    async fn process(&self, _: CountDeliveryJobsByState) -> Result<Vec<JobStateCount>, sqlx::Error> {
        sqlx::query_as::<_, JobStateCount>(
            "SELECT state, COUNT(*) AS count FROM delivery_jobs GROUP BY state",
        )
        .fetch_all(&self.pool)
        .await
    }
}

#[derive(Debug, Clone)]
/// Most recent terminally failed jobs.
pub struct ListFailedDeliveryJobs {
    pub limit: i64,
}

impl Processor<ListFailedDeliveryJobs> for DatabaseProcessor {
    type Output = Vec<DeliveryJob>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:ListFailedDeliveryJobs")]
    async fn process(&self, query: ListFailedDeliveryJobs) -> Result<Vec<DeliveryJob>, sqlx::Error> {
        let rows = sqlx::query_as::<_, DeliveryJobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM delivery_jobs WHERE state = 'failed' ORDER BY id DESC LIMIT $1"
        ))
        .bind(query.limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn props(value: Value) -> Option<Map<String, Value>> {
        value.as_object().cloned()
    }

    fn new_job(event_type: &str, properties: Option<Map<String, Value>>) -> NewJob {
        let now = OffsetDateTime::UNIX_EPOCH;
        NewJob::from_event(
            ChangeEvent {
                event_id: format!("evt-{event_type}"),
                event_type: event_type.into(),
                object_type: "company".into(),
                object_id: "42".into(),
                occurred_at: now,
                properties,
            },
            now,
            std::time::Duration::from_secs(1),
            3,
        )
    }

    #[test]
    fn creation_and_missing_properties_force_fetch() {
        assert!(new_job("company.creation", props(json!({"name": "x"}))).force_fetch);
        assert!(new_job("company.propertyChange", None).force_fetch);
        assert!(!new_job("company.propertyChange", props(json!({"name": "x"}))).force_fetch);
    }

    #[test]
    fn visible_after_delay() {
        let job = new_job("company.propertyChange", None);
        assert_eq!(job.visible_at - job.enqueued_at, time::Duration::seconds(1));
    }

    #[test]
    fn oversized_delay_does_not_overflow_the_clock() {
        let job = NewJob::from_event(
            ChangeEvent {
                event_id: "evt".into(),
                event_type: "company.propertyChange".into(),
                object_type: "company".into(),
                object_id: "42".into(),
                occurred_at: OffsetDateTime::UNIX_EPOCH,
                properties: None,
            },
            OffsetDateTime::UNIX_EPOCH,
            std::time::Duration::MAX,
            3,
        );
        assert!(job.visible_at > job.enqueued_at);
    }

    #[test]
    fn coalesce_merges_newer_values() {
        let mut job = new_job("company.propertyChange", props(json!({"a": 1, "b": 1}))).into_job(1);
        let visible_at = job.visible_at;
        coalesce_into(
            &mut job,
            new_job("company.propertyChange", props(json!({"b": 2, "c": 3}))),
        );
        assert_eq!(job.properties, props(json!({"a": 1, "b": 2, "c": 3})));
        assert_eq!(job.visible_at, visible_at);
        assert!(!job.force_fetch);
    }

    #[test]
    fn coalesce_keeps_fetch_requirement() {
        let mut job = new_job("company.creation", None).into_job(1);
        coalesce_into(
            &mut job,
            new_job("company.propertyChange", props(json!({"name": "Acme"}))),
        );
        assert!(job.force_fetch);
        assert_eq!(job.event_type, "company.propertyChange");
        assert_eq!(job.properties, props(json!({"name": "Acme"})));
    }
}
