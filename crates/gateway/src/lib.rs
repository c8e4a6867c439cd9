//! Mission Control gateway: event ingestion, live fan-out, query API, and
//! the agent chat reverse proxy, behind one axum router.

pub mod auth;
pub mod error;
pub mod fanout;
pub mod handlers;
pub mod ingest;
pub mod proxy;
pub mod state;
pub mod store;

use axum::Router;
use axum::http::HeaderValue;
use axum::middleware;
use axum::routing::{any, get, post};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use state::AppState;

/// Create the application router with all routes and middleware
pub fn create_router(state: AppState) -> Router {
    // Build CORS layer based on configuration
    let cors = if state
        .config
        .cors_allowed_origins
        .contains(&"*".to_string())
    {
        CorsLayer::permissive()
    } else {
        let origins: Vec<HeaderValue> = state
            .config
            .cors_allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([
                axum::http::Method::GET,
                axum::http::Method::POST,
                axum::http::Method::PUT,
                axum::http::Method::DELETE,
                axum::http::Method::OPTIONS,
            ])
            .allow_headers([
                axum::http::header::AUTHORIZATION,
                axum::http::header::CONTENT_TYPE,
            ])
            .allow_credentials(true)
    };

    // Public routes (no authentication required)
    let public_routes = Router::new().route("/health", get(handlers::health));

    // Protected routes (shared bearer token when configured)
    let protected_routes = Router::new()
        .route("/v1/tasks", post(handlers::tasks::create_task))
        .route("/v1/boards/default", get(handlers::tasks::get_board))
        .route(
            "/v1/tasks/{task_id}/comments",
            post(handlers::comments::create_comment),
        )
        .route("/v1/events", post(handlers::events::post_event))
        .route("/v1/feed", get(handlers::events::get_feed))
        .route("/v1/feed-lite", get(handlers::events::get_feed_lite))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_bearer,
        ));

    // Live fan-out; auth happens inside with WebSocket close codes
    let stream_routes = Router::new().route("/ws/events", get(fanout::ws_events));

    // Chat proxy: any method, any depth, plus WebSocket upgrades
    let chat_routes = Router::new()
        .route("/chat/{slug}", any(proxy::chat_root))
        .route("/chat/{slug}/", any(proxy::chat_root))
        .route("/chat/{slug}/{*rest}", any(proxy::chat_any));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(stream_routes)
        .merge(chat_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}
