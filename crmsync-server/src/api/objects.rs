//! Embedded CRM simulator.
//!
//! Objects live in memory; every create and every effective update emits a
//! change event into the broker.
//!
//! # Endpoints
//!
//! - `POST  /objects/{object_type}`              – create an object (201)
//! - `GET   /objects/{object_type}?limit&after`  – page through objects by id
//! - `GET   /objects/{object_type}/{object_id}`  – fetch one object
//! - `PATCH /objects/{object_type}/{object_id}`  – merge properties

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
};
use crmsync_core::PipelineError;
use crmsync_sdk::objects::{
    CreateObjectRequest, CrmObjectResponse, ListObjectsQuery, ListObjectsResponse,
};
use time::OffsetDateTime;

use super::error::ApiError;
use super::extractors::ApiJson;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/objects/{object_type}", post(create).get(list))
        .route(
            "/objects/{object_type}/{object_id}",
            get(fetch).patch(update),
        )
}

async fn create(
    State(state): State<AppState>,
    Path(object_type): Path<String>,
    ApiJson(body): ApiJson<CreateObjectRequest>,
) -> Result<(StatusCode, Json<CrmObjectResponse>), ApiError> {
    let object = state
        .objects
        .create(&object_type, body.properties, OffsetDateTime::now_utc())
        .await?;
    Ok((StatusCode::CREATED, Json(object.to_response())))
}

async fn list(
    State(state): State<AppState>,
    Path(object_type): Path<String>,
    Query(query): Query<ListObjectsQuery>,
) -> Json<ListObjectsResponse> {
    let page = state
        .objects
        .list(&object_type, query.clamped_limit(), query.after.as_deref())
        .await;
    Json(page.to_response())
}

async fn fetch(
    State(state): State<AppState>,
    Path((object_type, object_id)): Path<(String, String)>,
) -> Result<Json<CrmObjectResponse>, ApiError> {
    state
        .objects
        .get(&object_type, &object_id)
        .await
        .map(|o| Json(o.to_response()))
        .ok_or_else(|| not_found(&object_type, &object_id))
}

async fn update(
    State(state): State<AppState>,
    Path((object_type, object_id)): Path<(String, String)>,
    ApiJson(body): ApiJson<CreateObjectRequest>,
) -> Result<Json<CrmObjectResponse>, ApiError> {
    state
        .objects
        .update(
            &object_type,
            &object_id,
            body.properties,
            OffsetDateTime::now_utc(),
        )
        .await?
        .map(|o| Json(o.to_response()))
        .ok_or_else(|| not_found(&object_type, &object_id))
}

fn not_found(object_type: &str, object_id: &str) -> ApiError {
    PipelineError::not_found(format!("{object_type} {object_id}")).into()
}
