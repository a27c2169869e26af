//! Bearer token middleware
//!
//! Verifies the access token, then reloads the caller from the roster so the
//! stored role level (not the one baked into the token) drives every access
//! decision. Handlers read the result as `Extension<Principal>`.

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use tracing::debug;

use flightlog_common::access::Principal;
use flightlog_common::auth::{bearer_token, TokenKind};

use crate::error::ApiError;
use crate::AppState;

pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    let token = bearer_token(header).ok_or_else(|| ApiError::Unauthorized("missing bearer token".into()))?;

    let claims = state
        .sessions
        .tokens()
        .verify(token, TokenKind::Access)
        .map_err(|e| ApiError::Unauthorized(e.to_string()))?;

    let member = state
        .roster
        .find(claims.sub)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("unknown principal".into()))?;

    if member.role_level != claims.level {
        debug!(
            nip = member.nip,
            token_level = claims.level.value(),
            stored_level = member.role_level.value(),
            "Role level changed since token issue; using stored level"
        );
    }

    request.extensions_mut().insert(Principal {
        nip: member.nip,
        level: member.role_level,
    });
    Ok(next.run(request).await)
}
