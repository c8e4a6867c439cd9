/*!
 * Chat Proxy
 *
 * Same-origin reverse proxy for agent chat containers. `/chat/{slug}/...`
 * terminates browser traffic, injects the per-agent upstream credential,
 * rewrites bodies and URLs so the embedded UI keeps working under the
 * proxy's origin, and mirrors observable lifecycle points into the event
 * log as `chat.message.sent` / `chat.message.received` /
 * `chat.proxy.error`.
 */

pub mod avatar;
pub mod html;
mod http;
mod ws;

use std::collections::BTreeSet;

use axum::extract::{Path, Request, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use mission_domain::EventIn;
use serde_json::{Value, json};
use tracing::warn;

use crate::error::ApiError;
use crate::ingest;
use crate::state::AppState;

/// `/chat/{slug}`: upstream root.
pub async fn chat_root(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    req: Request,
) -> Response {
    dispatch(state, slug, String::new(), req).await
}

/// `/chat/{slug}/{rest...}`: any method, plus WebSocket upgrades.
pub async fn chat_any(
    State(state): State<AppState>,
    Path((slug, rest)): Path<(String, String)>,
    req: Request,
) -> Response {
    dispatch(state, slug, rest, req).await
}

async fn dispatch(state: AppState, slug: String, rest: String, req: Request) -> Response {
    let Some(upstream) = state.config.agents.get(&slug).cloned() else {
        return ApiError::NotFound(format!("unknown agent: {slug}")).into_response();
    };

    if is_websocket_upgrade(&req) {
        ws::handle(state, slug, upstream, rest, req).await
    } else {
        http::handle(state, slug, upstream, rest, req)
            .await
            .unwrap_or_else(IntoResponse::into_response)
    }
}

fn is_websocket_upgrade(req: &Request) -> bool {
    req.headers()
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false)
}

/// Sorted, deduplicated query parameter names. Values never leave the
/// proxy; keys are enough for the observability trail.
pub(crate) fn query_keys(query: Option<&str>) -> Vec<String> {
    let Some(query) = query else {
        return Vec::new();
    };
    let mut keys = BTreeSet::new();
    for pair in query.split('&') {
        let key = pair.split('=').next().unwrap_or(pair);
        if !key.is_empty() {
            keys.insert(key.to_string());
        }
    }
    keys.into_iter().collect()
}

pub(crate) fn sent_payload(
    method: &str,
    path: &str,
    query_keys: &[String],
    is_ws_upgrade: bool,
    content_length: usize,
) -> Value {
    json!({
        "method": method,
        "path": path,
        "query_keys": query_keys,
        "is_ws_upgrade": is_ws_upgrade,
        "content_length": content_length,
    })
}

pub(crate) fn received_payload(
    method: &str,
    path: &str,
    query_keys: &[String],
    is_ws_upgrade: bool,
    status_code: u16,
) -> Value {
    json!({
        "method": method,
        "path": path,
        "query_keys": query_keys,
        "is_ws_upgrade": is_ws_upgrade,
        "status_code": status_code,
    })
}

pub(crate) fn error_payload(
    method: &str,
    path: &str,
    query_keys: &[String],
    error_type: &str,
) -> Value {
    json!({
        "method": method,
        "path": path,
        "query_keys": query_keys,
        "error_type": error_type,
    })
}

/// Mirror one observed lifecycle point into the event log. Best-effort:
/// proxied traffic is never failed over bookkeeping.
pub(crate) async fn emit_proxy_event(
    state: &AppState,
    slug: &str,
    event_type: &str,
    payload: Value,
) {
    let body = EventIn {
        event_type: event_type.to_string(),
        agent: Some(slug.to_string()),
        task_id: None,
        payload: payload.as_object().cloned().unwrap_or_default(),
    };
    if let Err(e) = ingest::ingest(state, body).await {
        warn!(error = ?e, event_type, "failed to record proxy event");
    }
}

/// Upstream `Authorization` value: the configured scheme, unless the token
/// already carries one.
pub(crate) fn upstream_authorization(token: &str, scheme: &str) -> String {
    if token.to_ascii_lowercase().starts_with("bearer ") {
        token.to_string()
    } else {
        format!("{scheme} {token}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_keys_are_sorted_and_deduplicated() {
        assert_eq!(
            query_keys(Some("b=2&a=1&b=3&meta=1")),
            vec!["a".to_string(), "b".to_string(), "meta".to_string()]
        );
        assert!(query_keys(None).is_empty());
        assert!(query_keys(Some("")).is_empty());
        assert_eq!(query_keys(Some("flag")), vec!["flag".to_string()]);
    }

    #[test]
    fn upstream_authorization_respects_embedded_scheme() {
        assert_eq!(upstream_authorization("abc", "Bearer"), "Bearer abc");
        assert_eq!(upstream_authorization("abc", "Token"), "Token abc");
        assert_eq!(upstream_authorization("bearer abc", "Bearer"), "bearer abc");
        assert_eq!(upstream_authorization("Bearer abc", "Token"), "Bearer abc");
    }
}
