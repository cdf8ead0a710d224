use axum::{
    Json,
    extract::{Query, State},
};
use crmsync_core::PipelineError;
use crmsync_sdk::objects::{ConsumerStats, FailedJobsResponse};
use serde::Deserialize;

use crate::api::error::ApiError;
use crate::state::ConsumerState;

const MAX_FAILED_LIMIT: usize = 500;

#[derive(Debug, Deserialize)]
pub(super) struct FailedJobsQuery {
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    50
}

/// `GET /consumer/stats`
pub(super) async fn stats(
    State(consumer): State<ConsumerState>,
) -> Result<Json<ConsumerStats>, ApiError> {
    let jobs = consumer.jobs.counts().await.map_err(PipelineError::from)?;
    Ok(Json(ConsumerStats {
        jobs,
        counters: consumer.metrics.snapshot(),
    }))
}

/// `GET /consumer/jobs/failed?limit=`
pub(super) async fn failed(
    State(consumer): State<ConsumerState>,
    Query(query): Query<FailedJobsQuery>,
) -> Result<Json<FailedJobsResponse>, ApiError> {
    let limit = query.limit.clamp(1, MAX_FAILED_LIMIT);
    let jobs = consumer
        .jobs
        .failed(limit)
        .await
        .map_err(PipelineError::from)?;
    Ok(Json(FailedJobsResponse {
        jobs: jobs.iter().map(|j| j.to_view()).collect(),
    }))
}
