//! Comment ingress.

use axum::Json;
use axum::extract::{Path, State};
use mission_domain::Comment;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::ApiError;
use crate::ingest;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CommentCreate {
    pub author: String,
    pub body: String,
}

pub async fn create_comment(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
    Json(body): Json<CommentCreate>,
) -> Result<Json<Comment>, ApiError> {
    let comment = ingest::add_comment(&state, task_id, &body.author, &body.body).await?;
    Ok(Json(comment))
}
