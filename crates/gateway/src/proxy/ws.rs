//! WebSocket leg of the chat proxy.
//!
//! The client upgrade is accepted locally, the upstream socket is dialed
//! with the injected credential and a normalized `Origin`, and two pumps
//! forward frames until either side closes. Control `connect` requests
//! from the client gain the agent token when they carry none; upstream
//! frames mentioning `/avatar/` get their paths repointed.

use axum::extract::ws::{CloseFrame as AxCloseFrame, Message as AxMessage, WebSocket};
use axum::extract::{FromRequestParts, Request, ws::WebSocketUpgrade};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use mission_config::AgentUpstream;
use mission_domain::event::types;
use serde_json::{Value, json};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::CloseFrame as TgCloseFrame;
use tokio_tungstenite::tungstenite::Message as TgMessage;
use tracing::{debug, info};

use crate::state::AppState;

use super::avatar;

/// Loopback origins confuse upstream origin checks that expect the
/// console's own `localhost` host; normalize before dialing.
fn normalize_origin(origin: &str) -> String {
    if let Some(port) = origin.strip_prefix("http://127.0.0.1:") {
        format!("http://localhost:{port}")
    } else if let Some(port) = origin.strip_prefix("https://127.0.0.1:") {
        format!("https://localhost:{port}")
    } else {
        origin.to_string()
    }
}

fn ws_base_url(base: &str) -> String {
    if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    }
}

/// Merge the agent token into a control `connect` request that carries no
/// auth of its own. Anything else passes through byte-for-byte.
fn augment_connect_auth(text: &str, token: Option<&str>) -> String {
    let Some(token) = token else {
        return text.to_string();
    };
    let Ok(mut value) = serde_json::from_str::<Value>(text) else {
        return text.to_string();
    };
    if value.get("type").and_then(Value::as_str) != Some("req")
        || value.get("method").and_then(Value::as_str) != Some("connect")
        || !value.get("params").is_some_and(Value::is_object)
    {
        return text.to_string();
    }

    let Some(params) = value.get_mut("params").and_then(Value::as_object_mut) else {
        return text.to_string();
    };
    let mut auth = match params.get("auth") {
        Some(Value::Object(map)) => map.clone(),
        _ => serde_json::Map::new(),
    };
    let has_token = auth
        .get("token")
        .is_some_and(|t| t.as_str().map(|s| !s.is_empty()).unwrap_or(!t.is_null()));
    if !has_token {
        auth.insert("token".to_string(), json!(token));
    }
    if !auth.is_empty() {
        params.insert("auth".to_string(), Value::Object(auth));
    }

    serde_json::to_string(&value).unwrap_or_else(|_| text.to_string())
}

/// Rewrite avatar paths inside an upstream text frame, when it parses.
fn rewrite_avatar_frame(text: &str, slug: &str) -> String {
    if !text.contains("/avatar/") {
        return text.to_string();
    }
    match serde_json::from_str::<Value>(text) {
        Ok(mut value) => {
            avatar::rewrite_paths(&mut value, slug);
            serde_json::to_string(&value).unwrap_or_else(|_| text.to_string())
        }
        Err(_) => text.to_string(),
    }
}

async fn close_client(client: &mut WebSocket, reason: &str) {
    let _ = client
        .send(AxMessage::Close(Some(AxCloseFrame {
            code: 1011,
            reason: reason.to_string().into(),
        })))
        .await;
}

pub(super) async fn handle(
    state: AppState,
    slug: String,
    upstream: AgentUpstream,
    rest: String,
    req: Request,
) -> Response {
    let (mut parts, _body) = req.into_parts();
    let ws = match WebSocketUpgrade::from_request_parts(&mut parts, &()).await {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    let query = parts.uri.query().map(str::to_string);
    let origin = parts
        .headers
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(normalize_origin);

    ws.on_upgrade(move |client| proxy_session(state, slug, upstream, rest, query, origin, client))
}

async fn proxy_session(
    state: AppState,
    slug: String,
    upstream: AgentUpstream,
    rest: String,
    query: Option<String>,
    origin: Option<String>,
    mut client: WebSocket,
) {
    let path = format!("/{rest}");
    let keys = super::query_keys(query.as_deref());

    super::emit_proxy_event(
        &state,
        &slug,
        types::CHAT_MESSAGE_SENT,
        super::sent_payload("GET", &path, &keys, true, 0),
    )
    .await;

    let mut target = format!("{}/{}", ws_base_url(&upstream.base_url), rest);
    if let Some(query) = &query {
        target.push('?');
        target.push_str(query);
    }

    let mut request = match target.clone().into_client_request() {
        Ok(request) => request,
        Err(e) => {
            super::emit_proxy_event(
                &state,
                &slug,
                types::CHAT_PROXY_ERROR,
                super::error_payload("GET", &path, &keys, "handshake"),
            )
            .await;
            close_client(&mut client, &e.to_string()).await;
            return;
        }
    };
    if let Some(token) = &upstream.token {
        let value = super::upstream_authorization(token, &state.config.upstream_scheme);
        if let Ok(value) = value.parse() {
            request.headers_mut().insert(header::AUTHORIZATION, value);
        }
    }
    if let Some(origin) = &origin {
        if let Ok(value) = origin.parse() {
            request.headers_mut().insert(header::ORIGIN, value);
        }
    }

    let (upstream_ws, _handshake) = match connect_async(request).await {
        Ok(pair) => pair,
        Err(e) => {
            super::emit_proxy_event(
                &state,
                &slug,
                types::CHAT_PROXY_ERROR,
                super::error_payload("GET", &path, &keys, "connect"),
            )
            .await;
            close_client(&mut client, &e.to_string()).await;
            return;
        }
    };

    super::emit_proxy_event(
        &state,
        &slug,
        types::CHAT_MESSAGE_RECEIVED,
        super::received_payload("GET", &path, &keys, true, 101),
    )
    .await;

    info!(agent = %slug, path = %path, "chat websocket bridged");

    let token = upstream.token.clone();
    let frame_slug = slug.clone();
    let (mut upstream_tx, mut upstream_rx) = upstream_ws.split();
    let (mut client_tx, mut client_rx) = client.split();

    let client_to_upstream = async move {
        while let Some(msg) = client_rx.next().await {
            let msg = match msg {
                Ok(msg) => msg,
                Err(e) => {
                    let _ = upstream_tx
                        .send(TgMessage::Close(Some(TgCloseFrame {
                            code: 1011.into(),
                            reason: e.to_string().into(),
                        })))
                        .await;
                    break;
                }
            };
            let forwarded = match msg {
                AxMessage::Text(text) => {
                    let text = augment_connect_auth(text.as_str(), token.as_deref());
                    TgMessage::Text(text.into())
                }
                AxMessage::Binary(data) => TgMessage::Binary(data),
                AxMessage::Ping(data) => TgMessage::Ping(data),
                AxMessage::Pong(data) => TgMessage::Pong(data),
                AxMessage::Close(frame) => {
                    let _ = upstream_tx
                        .send(TgMessage::Close(frame.map(|f| TgCloseFrame {
                            code: f.code.into(),
                            reason: f.reason.as_str().to_string().into(),
                        })))
                        .await;
                    break;
                }
            };
            if upstream_tx.send(forwarded).await.is_err() {
                break;
            }
        }
    };

    let upstream_to_client = async move {
        while let Some(msg) = upstream_rx.next().await {
            let msg = match msg {
                Ok(msg) => msg,
                Err(e) => {
                    let _ = client_tx
                        .send(AxMessage::Close(Some(AxCloseFrame {
                            code: 1011,
                            reason: e.to_string().into(),
                        })))
                        .await;
                    break;
                }
            };
            let forwarded = match msg {
                TgMessage::Text(text) => {
                    let text = rewrite_avatar_frame(text.as_str(), &frame_slug);
                    AxMessage::Text(text.into())
                }
                TgMessage::Binary(data) => AxMessage::Binary(data),
                TgMessage::Ping(data) => AxMessage::Ping(data),
                TgMessage::Pong(data) => AxMessage::Pong(data),
                TgMessage::Close(frame) => {
                    let _ = client_tx
                        .send(AxMessage::Close(frame.map(|f| AxCloseFrame {
                            code: f.code.into(),
                            reason: f.reason.as_str().to_string().into(),
                        })))
                        .await;
                    break;
                }
                // Raw frames are an internal tungstenite detail.
                TgMessage::Frame(_) => continue,
            };
            if client_tx.send(forwarded).await.is_err() {
                break;
            }
        }
    };

    // Either pump finishing cancels the other and drops both sockets.
    tokio::select! {
        _ = client_to_upstream => debug!(agent = %slug, "chat client pump ended"),
        _ = upstream_to_client => debug!(agent = %slug, "chat upstream pump ended"),
    }

    info!(agent = %slug, "chat websocket closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_auth_is_merged_when_absent() {
        let out = augment_connect_auth(
            r#"{"type":"req","method":"connect","params":{}}"#,
            Some("tok-1"),
        );
        let value: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["params"]["auth"]["token"], "tok-1");
    }

    #[test]
    fn connect_auth_keeps_client_supplied_token() {
        let frame = r#"{"type":"req","method":"connect","params":{"auth":{"token":"mine"}}}"#;
        let out = augment_connect_auth(frame, Some("tok-1"));
        let value: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["params"]["auth"]["token"], "mine");
    }

    #[test]
    fn connect_auth_replaces_empty_token() {
        let frame = r#"{"type":"req","method":"connect","params":{"auth":{"token":""}}}"#;
        let out = augment_connect_auth(frame, Some("tok-1"));
        let value: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["params"]["auth"]["token"], "tok-1");
    }

    #[test]
    fn non_connect_frames_pass_through_verbatim() {
        for frame in [
            r#"{"type":"req","method":"send","params":{}}"#,
            r#"{"type":"event"}"#,
            "not json at all",
            r#"{"type":"req","method":"connect","params":"nope"}"#,
        ] {
            assert_eq!(augment_connect_auth(frame, Some("tok-1")), frame);
        }
        // No configured token: untouched even for connect requests.
        let frame = r#"{"type":"req","method":"connect","params":{}}"#;
        assert_eq!(augment_connect_auth(frame, None), frame);
    }

    #[test]
    fn origin_normalizes_loopback_hosts() {
        assert_eq!(
            normalize_origin("http://127.0.0.1:8910"),
            "http://localhost:8910"
        );
        assert_eq!(
            normalize_origin("https://127.0.0.1:443"),
            "https://localhost:443"
        );
        assert_eq!(normalize_origin("https://ops.example.com"), "https://ops.example.com");
    }

    #[test]
    fn ws_base_swaps_scheme() {
        assert_eq!(ws_base_url("http://agent-x:26216"), "ws://agent-x:26216");
        assert_eq!(ws_base_url("https://agent-x"), "wss://agent-x");
    }

    #[test]
    fn avatar_frames_are_rewritten_others_pass() {
        let out = rewrite_avatar_frame(r#"{"avatarUrl":"/avatar/x.png"}"#, "metrics");
        let value: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["avatarUrl"], "/chat/metrics/avatar/x.png");

        assert_eq!(rewrite_avatar_frame("plain text", "metrics"), "plain text");
        // Mentions /avatar/ but is not JSON: forwarded unchanged.
        assert_eq!(
            rewrite_avatar_frame("see /avatar/x.png", "metrics"),
            "see /avatar/x.png"
        );
    }
}
