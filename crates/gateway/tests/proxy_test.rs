/*!
 * Chat proxy tests against a stub upstream agent
 *
 * The stub plays the upstream console: HTML with the boot sentinel,
 * avatar endpoints, a redirect, an echo API, and a WebSocket stream. The
 * proxy must inject credentials, rewrite bodies and locations, emit the
 * synthetic chat events, and keep plain GETs out of the event log.
 */

mod common;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Json;
use axum::extract::ws::{Message as WsMessage, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use common::{base_config, build_state, get as get_req, json_body, post_json, send, spawn_server, text_body};
use futures_util::{SinkExt, StreamExt};
use mission_config::AgentUpstream;
use mission_gateway::create_router;
use mission_gateway::proxy::html::BASE_PATH_SENTINEL;
use serde_json::{Value, json};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as TgMessage;

/// What the stub upstream observed, for assertions.
#[derive(Clone, Default)]
struct Seen {
    http_auth: Arc<Mutex<Option<String>>>,
    ws_auth: Arc<Mutex<Option<String>>>,
}

async fn console(State(_seen): State<Seen>) -> impl IntoResponse {
    let html = format!(
        concat!(
            "<html><head><script>{sentinel}",
            r#"window.__AGENT_CONSOLE_ASSISTANT_AVATAR__="/avatar/default.png";"#,
            "</script></head><body>console</body></html>",
        ),
        sentinel = BASE_PATH_SENTINEL,
    );
    (
        [
            (header::CONTENT_TYPE, "text/html; charset=utf-8"),
            (header::X_FRAME_OPTIONS, "DENY"),
            (header::CONTENT_SECURITY_POLICY, "default-src 'self'"),
        ],
        html,
    )
}

async fn echo(
    State(seen): State<Seen>,
    headers: HeaderMap,
    body: String,
) -> impl IntoResponse {
    *seen.http_auth.lock().unwrap() = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    Json(json!({"ok": true, "echo": body}))
}

async fn avatar_known(Query(params): Query<HashMap<String, String>>) -> Response {
    if params.get("meta").map(String::as_str) == Some("1") {
        Json(json!({"avatarUrl": "/avatar/known.png"})).into_response()
    } else {
        ([(header::CONTENT_TYPE, "image/png")], "png-bytes").into_response()
    }
}

async fn avatar_missing() -> StatusCode {
    StatusCode::NOT_FOUND
}

async fn redirect() -> impl IntoResponse {
    (StatusCode::FOUND, [(header::LOCATION, "/login")], "")
}

async fn stream(
    State(seen): State<Seen>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    *seen.ws_auth.lock().unwrap() = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    ws.on_upgrade(|mut socket| async move {
        // Echo the first text frame, then push an avatar reference.
        if let Some(Ok(WsMessage::Text(text))) = socket.recv().await {
            let _ = socket.send(WsMessage::Text(text)).await;
        }
        let _ = socket
            .send(WsMessage::Text(r#"{"avatarUrl":"/avatar/x.png"}"#.into()))
            .await;
        tokio::time::sleep(Duration::from_millis(200)).await;
    })
}

async fn spawn_upstream(seen: Seen) -> SocketAddr {
    let app = axum::Router::new()
        .route("/", get(console))
        .route("/api/echo", post(echo))
        .route("/avatar/known.png", get(avatar_known))
        .route("/avatar/missing.png", get(avatar_missing))
        .route("/redirect", get(redirect))
        .route("/stream", get(stream))
        .with_state(seen);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Gateway state wired to a live stub upstream under the `metrics` slug.
async fn proxied_state(seen: Seen, token: Option<&str>) -> mission_gateway::AppState {
    let upstream_addr = spawn_upstream(seen).await;
    let mut config = base_config();
    config.agents.insert("metrics".to_string(), AgentUpstream {
        base_url: format!("http://{upstream_addr}"),
        token: token.map(String::from),
    });
    build_state(config).await
}

async fn feed(app: &axum::Router) -> Vec<Value> {
    let response = send(app, get_req("/v1/feed?limit=200")).await;
    json_body(response).await.as_array().cloned().unwrap()
}

#[tokio::test]
async fn html_injection_strips_framing_headers() {
    let state = proxied_state(Seen::default(), Some("up-tok")).await;
    let app = create_router(state);

    let response = send(&app, get_req("/chat/metrics/")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get(header::X_FRAME_OPTIONS).is_none());
    assert!(response.headers().get(header::CONTENT_SECURITY_POLICY).is_none());
    assert!(response.headers().get(header::CONTENT_TYPE).is_some());

    let body = text_body(response).await;
    assert!(!body.contains(BASE_PATH_SENTINEL));
    assert!(body.contains(r#"window.__AGENT_CONSOLE_BASE_PATH__="/chat/metrics";"#));
    assert!(body.contains(r#"+"/chat/metrics/";"#));
    assert!(body.contains(r#"v.token="up-tok";"#));
    assert!(body.contains(r#"window.__AGENT_CONSOLE_ASSISTANT_AVATAR__="";"#));
}

#[tokio::test]
async fn avatar_fallback_serves_placeholder_svg() {
    let state = proxied_state(Seen::default(), None).await;
    let app = create_router(state);

    let response = send(&app, get_req("/chat/metrics/avatar/missing.png")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "image/svg+xml"
    );
    let body = text_body(response).await;
    assert!(body.starts_with("<svg"));
    assert!(body.contains(">M</text>"));
}

#[tokio::test]
async fn avatar_meta_url_is_repointed() {
    let state = proxied_state(Seen::default(), None).await;
    let app = create_router(state);

    let response = send(&app, get_req("/chat/metrics/avatar/known.png?meta=1")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["avatarUrl"], "/chat/metrics/avatar/known.png?meta=1");

    // Non-meta hits pass the image through untouched.
    let response = send(&app, get_req("/chat/metrics/avatar/known.png")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(text_body(response).await, "png-bytes");
}

#[tokio::test]
async fn location_headers_come_back_under_the_proxy_prefix() {
    let state = proxied_state(Seen::default(), None).await;
    let app = create_router(state);

    let response = send(&app, get_req("/chat/metrics/redirect")).await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(
        response.headers().get(header::LOCATION).unwrap(),
        "/chat/metrics/login"
    );
}

#[tokio::test]
async fn plain_gets_are_idempotent_and_unlogged() {
    let state = proxied_state(Seen::default(), None).await;
    let app = create_router(state);

    let first = text_body(send(&app, get_req("/chat/metrics/")).await).await;
    let second = text_body(send(&app, get_req("/chat/metrics/")).await).await;
    assert_eq!(first, second);

    let entries = feed(&app).await;
    assert!(
        entries.iter().all(|e| e["type"] != "chat.message.sent"),
        "GETs must not produce chat.message.sent"
    );
}

#[tokio::test]
async fn posts_inject_auth_and_mirror_both_directions() {
    let seen = Seen::default();
    let state = proxied_state(seen.clone(), Some("up-tok")).await;
    let app = create_router(state);

    let response = send(
        &app,
        post_json("/chat/metrics/api/echo?trace=1&b=2", &json!({"a": 1})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["ok"], true);
    assert_eq!(body["echo"], r#"{"a":1}"#);

    // The upstream hop carried the configured credential.
    assert_eq!(
        seen.http_auth.lock().unwrap().as_deref(),
        Some("Bearer up-tok")
    );

    let entries = feed(&app).await;
    let sent = entries
        .iter()
        .find(|e| e["type"] == "chat.message.sent")
        .expect("chat.message.sent in feed");
    assert_eq!(sent["agent"], "metrics");
    assert_eq!(sent["payload"]["method"], "POST");
    assert_eq!(sent["payload"]["path"], "/api/echo");
    assert_eq!(sent["payload"]["query_keys"], json!(["b", "trace"]));
    assert_eq!(sent["payload"]["is_ws_upgrade"], false);
    assert_eq!(sent["payload"]["content_length"], 7);

    let received = entries
        .iter()
        .find(|e| e["type"] == "chat.message.received")
        .expect("chat.message.received in feed");
    assert_eq!(received["payload"]["status_code"], 200);
    assert_eq!(received["payload"]["is_ws_upgrade"], false);
}

#[tokio::test]
async fn unknown_slug_is_404() {
    let state = proxied_state(Seen::default(), None).await;
    let app = create_router(state);

    let response = send(&app, get_req("/chat/nobody/home")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn upstream_transport_failure_is_502_with_error_event() {
    // Grab a port that nothing listens on.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_addr = listener.local_addr().unwrap();
    drop(listener);

    let mut config = base_config();
    config.agents.insert("dead".to_string(), AgentUpstream {
        base_url: format!("http://{dead_addr}"),
        token: None,
    });
    let state = build_state(config).await;
    let app = create_router(state);

    let response = send(&app, post_json("/chat/dead/api/echo", &json!({}))).await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = text_body(response).await;
    assert!(body.starts_with("Upstream unavailable:"), "{body}");

    let entries = feed(&app).await;
    let error = entries
        .iter()
        .find(|e| e["type"] == "chat.proxy.error")
        .expect("chat.proxy.error in feed");
    assert_eq!(error["payload"]["method"], "POST");
    assert_eq!(error["payload"]["path"], "/api/echo");
    assert_eq!(error["payload"]["error_type"], "connect");
}

#[tokio::test]
async fn websocket_bridge_merges_auth_and_rewrites_avatars() {
    let seen = Seen::default();
    let state = proxied_state(seen.clone(), Some("up-tok")).await;
    let gateway_addr = spawn_server(state.clone()).await;

    let (mut ws, _) = connect_async(format!("ws://{gateway_addr}/chat/metrics/stream"))
        .await
        .expect("bridge connects");

    ws.send(TgMessage::Text(
        r#"{"type":"req","method":"connect","params":{}}"#.into(),
    ))
    .await
    .unwrap();

    // The stub echoes what it received: the connect frame with the token
    // merged in by the proxy.
    let echoed = timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("timed out")
        .expect("stream ended")
        .expect("socket error");
    let TgMessage::Text(text) = echoed else {
        panic!("expected text frame, got {echoed:?}");
    };
    let value: Value = serde_json::from_str(text.as_str()).unwrap();
    assert_eq!(value["params"]["auth"]["token"], "up-tok");

    // Upstream-pushed avatar paths come back under the proxy prefix.
    let pushed = timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("timed out")
        .expect("stream ended")
        .expect("socket error");
    let TgMessage::Text(text) = pushed else {
        panic!("expected text frame, got {pushed:?}");
    };
    let value: Value = serde_json::from_str(text.as_str()).unwrap();
    assert_eq!(value["avatarUrl"], "/chat/metrics/avatar/x.png");

    // The upstream handshake carried the credential.
    assert_eq!(
        seen.ws_auth.lock().unwrap().as_deref(),
        Some("Bearer up-tok")
    );

    // Both lifecycle points are mirrored with upgrade semantics.
    let app = create_router(state);
    let entries = feed(&app).await;
    let sent = entries
        .iter()
        .find(|e| e["type"] == "chat.message.sent")
        .expect("chat.message.sent in feed");
    assert_eq!(sent["payload"]["is_ws_upgrade"], true);
    assert_eq!(sent["payload"]["path"], "/stream");
    let received = entries
        .iter()
        .find(|e| e["type"] == "chat.message.received")
        .expect("chat.message.received in feed");
    assert_eq!(received["payload"]["status_code"], 101);
    assert_eq!(received["payload"]["is_ws_upgrade"], true);
}
