//! HTTP leg of the chat proxy.

use anyhow::anyhow;
use axum::body::Body;
use axum::extract::Request;
use axum::http::{HeaderName, Method, Response as HttpResponse, header};
use axum::response::Response;
use mission_config::AgentUpstream;
use mission_domain::event::types;

use crate::error::ApiError;
use crate::state::AppState;

use super::{avatar, html};

/// Request headers owned by the proxy hop rather than forwarded.
/// `accept-encoding` stays home so the client negotiates (and decodes)
/// upstream compression itself; responses leave here identity-encoded.
const SKIP_REQUEST_HEADERS: [HeaderName; 4] = [
    header::HOST,
    header::CONTENT_LENGTH,
    header::CONNECTION,
    header::ACCEPT_ENCODING,
];

/// Response headers dropped on the way back. The framing trio is
/// recomputed for the rewritten body; the frame/CSP pair is removed so the
/// dashboard may embed the console in an iframe under the proxy's origin.
const STRIP_RESPONSE_HEADERS: [HeaderName; 6] = [
    header::CONTENT_LENGTH,
    header::TRANSFER_ENCODING,
    header::CONTENT_ENCODING,
    header::CONNECTION,
    header::X_FRAME_OPTIONS,
    header::CONTENT_SECURITY_POLICY,
];

/// Short class names for 502 bodies and `chat.proxy.error` payloads.
fn transport_error_class(err: &reqwest::Error) -> &'static str {
    if err.is_timeout() {
        "timeout"
    } else if err.is_connect() {
        "connect"
    } else if err.is_body() || err.is_decode() {
        "body"
    } else {
        "request"
    }
}

/// Repoint a `Location` header under the proxy prefix.
fn rewrite_location(location: &str, upstream_base: &str, slug: &str) -> String {
    if let Some(suffix) = location.strip_prefix(upstream_base) {
        format!("/chat/{slug}{suffix}")
    } else if location.starts_with('/') {
        format!("/chat/{slug}{location}")
    } else {
        location.to_string()
    }
}

fn has_query_param(query: Option<&str>, key: &str, value: &str) -> bool {
    let Some(query) = query else {
        return false;
    };
    query.split('&').any(|pair| {
        pair.split_once('=')
            .is_some_and(|(k, v)| k == key && v == value)
    })
}

pub(super) async fn handle(
    state: AppState,
    slug: String,
    upstream: AgentUpstream,
    rest: String,
    req: Request,
) -> Result<Response, ApiError> {
    let method = req.method().clone();
    let query = req.uri().query().map(str::to_string);
    let request_headers = req.headers().clone();
    let body = axum::body::to_bytes(req.into_body(), usize::MAX)
        .await
        .map_err(|e| ApiError::Internal(anyhow!("failed to read request body: {e}")))?;

    let path = format!("/{rest}");
    let keys = super::query_keys(query.as_deref());
    // Plain GETs stay out of the event log; everything with side-effect
    // potential is mirrored.
    let observed = method != Method::GET;

    if observed {
        super::emit_proxy_event(
            &state,
            &slug,
            types::CHAT_MESSAGE_SENT,
            super::sent_payload(method.as_str(), &path, &keys, false, body.len()),
        )
        .await;
    }

    let mut target = format!("{}/{}", upstream.base_url, rest);
    if let Some(query) = &query {
        target.push('?');
        target.push_str(query);
    }

    let mut request = state.http.request(method.clone(), &target);
    for (name, value) in request_headers.iter() {
        if SKIP_REQUEST_HEADERS.contains(name) {
            continue;
        }
        request = request.header(name, value);
    }
    if let Some(token) = &upstream.token {
        request = request.header(
            header::AUTHORIZATION,
            super::upstream_authorization(token, &state.config.upstream_scheme),
        );
    }

    let upstream_response = match request.body(body).send().await {
        Ok(response) => response,
        Err(e) => {
            let class = transport_error_class(&e);
            super::emit_proxy_event(
                &state,
                &slug,
                types::CHAT_PROXY_ERROR,
                super::error_payload(method.as_str(), &path, &keys, class),
            )
            .await;
            return Err(ApiError::Upstream(class.to_string()));
        }
    };

    let status = upstream_response.status();
    let response_headers = upstream_response.headers().clone();
    let content_type = response_headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let mut bytes = match upstream_response.bytes().await {
        Ok(bytes) => bytes.to_vec(),
        Err(e) => {
            let class = transport_error_class(&e);
            super::emit_proxy_event(
                &state,
                &slug,
                types::CHAT_PROXY_ERROR,
                super::error_payload(method.as_str(), &path, &keys, class),
            )
            .await;
            return Err(ApiError::Upstream(class.to_string()));
        }
    };

    if observed {
        super::emit_proxy_event(
            &state,
            &slug,
            types::CHAT_MESSAGE_RECEIVED,
            super::received_payload(method.as_str(), &path, &keys, false, status.as_u16()),
        )
        .await;
    }

    // Avatar endpoints: metadata gets its URL repointed, a missing image
    // gets the deterministic placeholder.
    if method == Method::GET && rest.starts_with("avatar/") {
        let is_meta = has_query_param(query.as_deref(), "meta", "1");

        if is_meta
            && status.is_success()
            && content_type.contains("application/json")
        {
            if let Some(rewritten) = avatar::rewrite_meta(&bytes, &slug, query.as_deref()) {
                bytes = rewritten;
            }
        }

        if !is_meta && status == reqwest::StatusCode::NOT_FOUND {
            return Ok(HttpResponse::builder()
                .status(axum::http::StatusCode::OK)
                .header(header::CONTENT_TYPE, "image/svg+xml")
                .body(Body::from(avatar::fallback_svg(&slug)))
                .map_err(|e| ApiError::Internal(anyhow!(e)))?);
        }
    }

    if content_type.contains("text/html") {
        let text = String::from_utf8_lossy(&bytes);
        bytes = html::rewrite_html(&text, &slug, upstream.token.as_deref()).into_bytes();
    }

    let mut builder = HttpResponse::builder().status(status);
    for (name, value) in response_headers.iter() {
        if STRIP_RESPONSE_HEADERS.contains(name) {
            continue;
        }
        if name == header::LOCATION {
            if let Ok(location) = value.to_str() {
                builder = builder.header(
                    header::LOCATION,
                    rewrite_location(location, &upstream.base_url, &slug),
                );
                continue;
            }
        }
        builder = builder.header(name, value);
    }

    builder
        .body(Body::from(bytes))
        .map_err(|e| ApiError::Internal(anyhow!(e)))
}
