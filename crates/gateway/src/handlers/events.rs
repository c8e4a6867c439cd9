//! Event ingestion endpoint and the feed queries.

use axum::Json;
use axum::extract::{Query, State};
use mission_domain::{Event, EventIn, EventLite};
use serde::Deserialize;

use crate::error::ApiError;
use crate::ingest;
use crate::state::AppState;
use crate::store;

#[derive(Debug, Deserialize)]
pub struct FeedQuery {
    pub limit: Option<i64>,
}

const DEFAULT_FEED_LIMIT: i64 = 50;

pub async fn post_event(
    State(state): State<AppState>,
    Json(body): Json<EventIn>,
) -> Result<Json<Event>, ApiError> {
    let event = ingest::ingest(&state, body).await?;
    Ok(Json(event))
}

pub async fn get_feed(
    State(state): State<AppState>,
    Query(query): Query<FeedQuery>,
) -> Result<Json<Vec<Event>>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_FEED_LIMIT);
    let events = store::list_feed(&state.pool, limit).await?;
    Ok(Json(events))
}

pub async fn get_feed_lite(
    State(state): State<AppState>,
    Query(query): Query<FeedQuery>,
) -> Result<Json<Vec<EventLite>>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_FEED_LIMIT);
    let events = store::list_feed_lite(&state.pool, limit).await?;
    Ok(Json(events))
}
