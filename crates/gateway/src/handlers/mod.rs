pub mod comments;
pub mod events;
pub mod tasks;

use axum::Json;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct Health {
    pub ok: bool,
}

/// Liveness probe; deliberately unauthenticated.
pub async fn health() -> Json<Health> {
    Json(Health { ok: true })
}
