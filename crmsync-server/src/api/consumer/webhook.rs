use axum::{Json, extract::State, http::StatusCode};
use crmsync_sdk::objects::IntakeAcceptedResponse;
use time::OffsetDateTime;

use crate::api::error::ApiError;
use crate::api::extractors::SignedDelivery;
use crate::state::ConsumerState;

/// `POST /consumer/webhook`: verify a delivery and queue it for processing.
pub(super) async fn receive(
    State(consumer): State<ConsumerState>,
    delivery: SignedDelivery,
) -> Result<(StatusCode, Json<IntakeAcceptedResponse>), ApiError> {
    let enqueued = consumer
        .intake
        .ingest(
            delivery.signature.as_deref(),
            &delivery.body,
            OffsetDateTime::now_utc(),
        )
        .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(IntakeAcceptedResponse {
            accepted: true,
            job_id: enqueued.job_id,
            coalesced: enqueued.coalesced,
        }),
    ))
}
