//! # Mission Control Common Library
//!
//! Shared infrastructure used by the gateway service:
//! - Database connection pooling (SQLite via sqlx)
//! - Stream broker abstraction with in-process and Redis Streams backends
//! - Custom error types
//! - Structured logging setup

// Module declarations
pub mod broker;
pub mod db;
pub mod error;
pub mod logging;

// Re-export commonly used types
pub use broker::{MemoryBroker, RedisBroker, StreamBroker, StreamEntry};
pub use db::create_pool;
pub use error::{Error, Result};
pub use logging::{init_tracing, init_tracing_json};
