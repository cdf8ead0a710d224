use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use crmsync_core::PipelineError;
use crmsync_sdk::objects::{
    DeregisterResponse, ListSubscriptionsResponse, RegisterSubscriptionRequest,
    RegisterSubscriptionResponse,
};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::api::extractors::ApiJson;
use crate::state::AppState;

/// `POST /subscriptions`
pub(super) async fn register(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<RegisterSubscriptionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let registered = state
        .registry
        .register(body, OffsetDateTime::now_utc())
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(RegisterSubscriptionResponse {
            subscription_id: registered.subscription.id,
            secret: registered.generated_secret,
        }),
    ))
}

/// `GET /subscriptions`
pub(super) async fn list(
    State(state): State<AppState>,
) -> Result<Json<ListSubscriptionsResponse>, ApiError> {
    let subscriptions = state.registry.list().await?;
    Ok(Json(ListSubscriptionsResponse {
        subscriptions: subscriptions.iter().map(|s| s.to_response()).collect(),
    }))
}

/// `DELETE /subscriptions/{id}`
///
/// An id that is not a UUID cannot name a subscription and is reported as 404.
pub(super) async fn deregister(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeregisterResponse>, ApiError> {
    let id = Uuid::parse_str(&id)
        .map_err(|_| PipelineError::not_found(format!("subscription {id}")))?;
    state.registry.deregister(id).await?;
    Ok(Json(DeregisterResponse { deleted: id }))
}
