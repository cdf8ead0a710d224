//! Broker API handlers.
//!
//! # Endpoints
//!
//! - `POST   /subscriptions`        – register a subscription
//! - `GET    /subscriptions`        – list subscriptions (secrets omitted)
//! - `DELETE /subscriptions/{id}`   – remove a subscription
//! - `POST   /webhook`              – ingest and fan out a change event
//! - `POST   /replay/{event_id}`    – deliver a retained event again
//! - `GET    /stats`                – subscription, event and delivery counters

use axum::{
    Router,
    routing::{delete, get, post},
};

use crate::state::AppState;

mod ingress;
mod stats;
mod subscriptions;

/// Build the Broker API router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/subscriptions",
            post(subscriptions::register).get(subscriptions::list),
        )
        .route("/subscriptions/{id}", delete(subscriptions::deregister))
        .route("/webhook", post(ingress::publish))
        .route("/replay/{event_id}", post(ingress::replay))
        .route("/stats", get(stats::broker_stats))
}
