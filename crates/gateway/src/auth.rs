//! Shared-bearer authentication.
//!
//! One token guards the whole `/v1` surface and the fan-out socket. No
//! token configured means auth is off (local single-operator setups). The
//! token value itself is never logged.

use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;

use crate::error::ApiError;
use crate::state::AppState;

/// WebSocket close codes for auth failures, mirroring 401/403.
pub const WS_CLOSE_MISSING_TOKEN: u16 = 4401;
pub const WS_CLOSE_INVALID_TOKEN: u16 = 4403;

/// Validate an `Authorization` header against the configured token.
///
/// The `Bearer` prefix is matched case-insensitively; surrounding
/// whitespace on the token is ignored.
pub fn check_bearer(expected: Option<&str>, authorization: Option<&str>) -> Result<(), ApiError> {
    let Some(expected) = expected else {
        return Ok(());
    };
    let Some(authorization) = authorization else {
        return Err(ApiError::MissingToken);
    };
    let is_bearer = authorization
        .get(..7)
        .map(|prefix| prefix.eq_ignore_ascii_case("bearer "))
        .unwrap_or(false);
    if !is_bearer {
        return Err(ApiError::MissingToken);
    }
    let token = authorization[7..].trim();
    if token != expected {
        return Err(ApiError::InvalidToken);
    }
    Ok(())
}

/// Close code for a WebSocket subscriber, or `None` when the connection is
/// allowed.
pub fn ws_reject_code(expected: Option<&str>, authorization: Option<&str>) -> Option<u16> {
    match check_bearer(expected, authorization) {
        Ok(()) => None,
        Err(ApiError::MissingToken) => Some(WS_CLOSE_MISSING_TOKEN),
        Err(_) => Some(WS_CLOSE_INVALID_TOKEN),
    }
}

/// Middleware guarding the `/v1` routes.
pub async fn require_bearer(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let authorization = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    check_bearer(state.config.auth_token.as_deref(), authorization)?;
    Ok(next.run(req).await)
}
