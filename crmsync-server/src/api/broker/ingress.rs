use axum::{
    Json,
    extract::{Path, State},
};
use crmsync_sdk::objects::{IngressEvent, PublishResponse};

use crate::api::error::ApiError;
use crate::api::extractors::ApiJson;
use crate::state::AppState;

/// `POST /webhook`: record an event and fan it out.
///
/// Individual subscriber failures are reported in the counts, never as an
/// error status.
pub(super) async fn publish(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<IngressEvent>,
) -> Result<Json<PublishResponse>, ApiError> {
    let report = state.publisher.publish_ingress(body).await?;
    Ok(Json(report.to_response()))
}

/// `POST /replay/{event_id}`
pub(super) async fn replay(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
) -> Result<Json<PublishResponse>, ApiError> {
    let report = state.publisher.replay(&event_id).await?;
    Ok(Json(report.to_response()))
}
