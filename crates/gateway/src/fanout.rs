/*!
 * Fan-out Hub
 *
 * Pushes every new stream entry to each connected `/ws/events` subscriber.
 *
 * ## Connection Flow
 * 1. Client connects; the bearer token (when configured) is checked and
 *    failures close with 4401/4403
 * 2. The cursor starts at the broker tail. History is deliberately not
 *    replayed so reconnection storms stay cheap; pollers use the query API
 *    for initial state
 * 3. Blocking reads up to 25 s; silence sends a `{"type":"ping"}` frame,
 *    entries are forwarded verbatim as text frames
 * 4. Peer close or a failed send ends the task
 *
 * Each subscriber is an independent task owning its socket halves and its
 * cursor; the broker is the only shared resource.
 */

use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{HeaderMap, header};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use crate::auth;
use crate::state::AppState;

/// Broker read window per loop; also the keep-alive cadence.
const READ_BLOCK: Duration = Duration::from_secs(25);
/// Entries drained per read.
const READ_BATCH: usize = 50;
/// Keep-alive frame sent on a silent window.
const PING_FRAME: &str = r#"{"type":"ping"}"#;

pub async fn ws_events(
    State(state): State<AppState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    ws.on_upgrade(move |socket| handle_subscriber(socket, authorization, state))
}

async fn handle_subscriber(socket: WebSocket, authorization: Option<String>, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    // Accept first, then close with the 4xxx code, so the client sees the
    // reason instead of a failed handshake.
    if let Some(code) = auth::ws_reject_code(
        state.config.auth_token.as_deref(),
        authorization.as_deref(),
    ) {
        let reason = if code == auth::WS_CLOSE_MISSING_TOKEN {
            "missing bearer token"
        } else {
            "invalid token"
        };
        let _ = sender
            .send(Message::Close(Some(CloseFrame {
                code,
                reason: reason.into(),
            })))
            .await;
        return;
    }

    let key = state.config.stream_key.clone();
    // Tail semantics: events ingested before this point are never replayed.
    let mut last_id = match state.broker.latest_id(&key).await {
        Ok(id) => id,
        Err(e) => {
            warn!(error = %e, "latest_id failed; falling back to tail marker");
            "$".to_string()
        }
    };

    info!("fan-out subscriber connected");

    'subscriber: loop {
        tokio::select! {
            // The receive half only matters for detecting the peer going
            // away (and answering protocol pings).
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break 'subscriber,
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break 'subscriber;
                        }
                    }
                    Some(Err(e)) => {
                        debug!(error = %e, "subscriber socket error");
                        break 'subscriber;
                    }
                    _ => {}
                }
            }
            result = state.broker.read(&key, &last_id, READ_BLOCK, READ_BATCH) => {
                match result {
                    Ok(entries) if entries.is_empty() => {
                        if sender.send(Message::Text(PING_FRAME.into())).await.is_err() {
                            break 'subscriber;
                        }
                    }
                    Ok(entries) => {
                        for entry in entries {
                            if sender.send(Message::Text(entry.data.into())).await.is_err() {
                                break 'subscriber;
                            }
                            last_id = entry.id;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "stream broker read failed");
                        let _ = sender
                            .send(Message::Close(Some(CloseFrame {
                                code: 1011,
                                reason: "stream broker unavailable".into(),
                            })))
                            .await;
                        break 'subscriber;
                    }
                }
            }
        }
    }

    info!("fan-out subscriber disconnected");
}
