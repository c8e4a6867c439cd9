//! Error types for the Mission Control core.
//!
//! One enum wraps everything the service layers can fail with; the gateway
//! maps these onto HTTP responses at the edge.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Database errors (SQLite via sqlx)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Stream broker errors (Redis backend)
    #[error("Broker error: {0}")]
    Broker(#[from] redis::RedisError),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Event validation failures; each string is one reported problem
    #[error("Validation error: {}", .0.join("; "))]
    Validation(Vec<String>),

    /// Missing bearer token / token mismatch
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Unknown task, agent slug, or similar
    #[error("Not found: {0}")]
    NotFound(String),

    /// Upstream transport failures on the proxy hop
    #[error("Upstream unavailable: {0}")]
    Upstream(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic errors
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Result type alias for Mission Control operations
pub type Result<T> = std::result::Result<T, Error>;
