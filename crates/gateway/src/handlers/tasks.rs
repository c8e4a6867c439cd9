//! Task creation and the board view.

use axum::Json;
use axum::extract::State;
use mission_domain::{Task, TaskStatus};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::ingest;
use crate::state::AppState;
use crate::store;

#[derive(Debug, Deserialize)]
pub struct TaskCreate {
    pub title: String,
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default)]
    pub assignee: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_status() -> String {
    "INBOX".to_string()
}

#[derive(Debug, Serialize)]
pub struct BoardColumn {
    pub title: String,
    pub count: usize,
    pub cards: Vec<Task>,
}

#[derive(Debug, Serialize)]
pub struct BoardOut {
    pub columns: Vec<BoardColumn>,
}

pub async fn create_task(
    State(state): State<AppState>,
    Json(body): Json<TaskCreate>,
) -> Result<Json<Task>, ApiError> {
    // Exact-match on purpose: producers send the canonical constants.
    let Some(status) = TaskStatus::parse(&body.status) else {
        return Err(ApiError::Unprocessable(format!(
            "invalid task status: {}; allowed={}",
            body.status,
            ingest::all_statuses_list()
        )));
    };

    let mut tx = state.pool.begin().await?;
    let task = store::insert_task(
        &mut tx,
        &body.title,
        status,
        body.assignee.as_deref(),
        &body.tags,
    )
    .await?;
    tx.commit().await?;

    Ok(Json(task))
}

pub async fn get_board(State(state): State<AppState>) -> Result<Json<BoardOut>, ApiError> {
    let columns = store::list_board(&state.pool)
        .await?
        .into_iter()
        .map(|(status, cards)| BoardColumn {
            title: status.as_str().to_string(),
            count: cards.len(),
            cards,
        })
        .collect();
    Ok(Json(BoardOut { columns }))
}
