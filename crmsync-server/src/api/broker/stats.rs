use axum::{Json, extract::State};
use crmsync_core::PipelineError;
use crmsync_sdk::objects::BrokerStats;

use crate::api::error::ApiError;
use crate::state::AppState;

/// `GET /stats`
pub(super) async fn broker_stats(State(state): State<AppState>) -> Result<Json<BrokerStats>, ApiError> {
    let subscriptions = state.registry.list().await?;
    let events_by_type = state
        .publisher
        .events()
        .count_by_type()
        .await
        .map_err(PipelineError::from)?;
    Ok(Json(BrokerStats {
        total_subscriptions: subscriptions.len() as u64,
        active_subscriptions: subscriptions.iter().filter(|s| s.active).count() as u64,
        retained_events: events_by_type.values().sum(),
        events_by_type,
        deliveries_succeeded: state.delivery_metrics.succeeded(),
        deliveries_failed: state.delivery_metrics.failed(),
    }))
}
