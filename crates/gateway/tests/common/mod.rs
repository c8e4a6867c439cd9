//! Shared fixtures for the gateway integration tests: an in-memory
//! database, the in-process stream broker, and request helpers.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response};
use http_body_util::BodyExt;
use mission_common::{MemoryBroker, create_pool};
use mission_config::Config;
use mission_gateway::{AppState, create_router};
use serde_json::Value;
use tower::util::ServiceExt;

pub fn base_config() -> Config {
    Config {
        server_host: "127.0.0.1".to_string(),
        server_port: 0,
        auth_token: None,
        database_url: "sqlite::memory:".to_string(),
        database_max_connections: 1,
        broker_url: None,
        stream_key: "mc:events".to_string(),
        agents: HashMap::new(),
        upstream_scheme: "Bearer".to_string(),
        agent_homes_dir: None,
        cors_allowed_origins: vec!["*".to_string()],
        log_format: "compact".to_string(),
    }
}

pub async fn build_state(config: Config) -> AppState {
    let pool = create_pool(&config.database_url, config.database_max_connections)
        .await
        .expect("Failed to create test pool");
    sqlx::migrate!("../../migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");
    AppState::new(pool, Arc::new(MemoryBroker::new()), config).expect("Failed to build state")
}

pub async fn test_app() -> (AppState, Router) {
    let state = build_state(base_config()).await;
    let app = create_router(state.clone());
    (state, app)
}

/// Spawn the router on an ephemeral port for tests that need real sockets.
pub async fn spawn_server(state: AppState) -> std::net::SocketAddr {
    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test listener");
    let addr = listener.local_addr().expect("Failed to read local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("test server failed");
    });
    addr
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub async fn send(app: &Router, request: Request<Body>) -> Response<Body> {
    app.clone()
        .oneshot(request)
        .await
        .expect("request should produce a response")
}

/// Extract a JSON response body.
pub async fn json_body(response: Response<Body>) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("Failed to read response body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("Failed to parse JSON")
}

pub async fn text_body(response: Response<Body>) -> String {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("Failed to read response body")
        .to_bytes();
    String::from_utf8_lossy(&bytes).to_string()
}
