//! Consumer API handlers.
//!
//! Mounted only when the consumer is enabled.
//!
//! # Endpoints
//!
//! - `POST /consumer/webhook`      – signed delivery intake (202)
//! - `GET  /consumer/stats`        – job counts per state and pipeline counters
//! - `GET  /consumer/jobs/failed`  – terminally failed jobs, newest first

use axum::{
    Router,
    routing::{get, post},
};

use crate::state::{AppState, ConsumerState};

mod jobs;
mod webhook;

/// Build the Consumer API router.
pub fn router(consumer: ConsumerState) -> Router<AppState> {
    Router::new()
        .route("/consumer/webhook", post(webhook::receive))
        .route("/consumer/stats", get(jobs::stats))
        .route("/consumer/jobs/failed", get(jobs::failed))
        .with_state(consumer)
}
