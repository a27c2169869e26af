//! `/auth/*` credential endpoints and the refresh cookie

use axum::{
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info, warn};

use flightlog_common::config::{AuthConfig, SameSite};

use crate::error::{ApiError, ApiResult};
use crate::services::session::{IssuedSession, RefreshError};
use crate::AppState;

const REFRESH_COOKIE: &str = "refresh_token";

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub nip: i64,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RecoverRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetRequest {
    pub token: String,
    pub password: String,
}

pub fn session_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .route("/auth/logout", post(logout))
        .route("/auth/recover", post(recover))
        .route("/auth/reset", post(reset))
}

/// POST /auth/login
pub async fn login(State(state): State<AppState>, Json(request): Json<LoginRequest>) -> ApiResult<Response> {
    let session = state.sessions.login(request.nip, &request.password).await?;
    Ok(session_response(&state.config.auth, session))
}

/// POST /auth/refresh
///
/// Expired and missing cookies get a plain 401. Anything else that fails
/// verification also clears the cookie.
pub async fn refresh(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(token) = cookie_value(&headers, REFRESH_COOKIE) else {
        return ApiError::Unauthorized("missing refresh token".into()).into_response();
    };

    match state.sessions.refresh(&token).await {
        Ok(session) => session_response(&state.config.auth, session),
        Err(RefreshError::Expired) => ApiError::Unauthorized("refresh token expired".into()).into_response(),
        Err(RefreshError::Malformed(reason)) => {
            warn!("Rejected refresh token: {}", reason);
            let mut response = ApiError::Unauthorized("invalid refresh token".into()).into_response();
            append_cookie(&mut response, &clear_cookie(&state.config.auth));
            response
        }
        Err(RefreshError::Internal(e)) => ApiError::from(e).into_response(),
    }
}

/// POST /auth/logout
pub async fn logout(State(state): State<AppState>) -> Response {
    let mut response = StatusCode::NO_CONTENT.into_response();
    append_cookie(&mut response, &clear_cookie(&state.config.auth));
    response
}

/// POST /auth/recover
///
/// Always 200 so the endpoint cannot be used to probe addresses.
pub async fn recover(State(state): State<AppState>, Json(request): Json<RecoverRequest>) -> Json<serde_json::Value> {
    if let Err(e) = state.sessions.recover(&request.email).await {
        error!("Password recovery failed: {}", e);
    }
    Json(json!({ "status": "ok" }))
}

/// POST /auth/reset
pub async fn reset(State(state): State<AppState>, Json(request): Json<ResetRequest>) -> ApiResult<StatusCode> {
    state.sessions.reset(&request.token, &request.password).await?;
    info!("Password changed through reset token");
    Ok(StatusCode::NO_CONTENT)
}

fn session_response(config: &AuthConfig, session: IssuedSession) -> Response {
    let max_age = config.refresh_token_days * 24 * 60 * 60;
    let mut response = Json(session.body).into_response();
    append_cookie(&mut response, &refresh_cookie(config, &session.refresh_token, max_age));
    response
}

/// `Set-Cookie` value for the refresh token
pub fn refresh_cookie(config: &AuthConfig, value: &str, max_age: u64) -> String {
    let same_site = match config.refresh_cookie_same_site {
        SameSite::Lax => "SameSite=Lax",
        SameSite::None => "SameSite=None; Secure",
    };
    format!(
        "{REFRESH_COOKIE}={value}; Path={}; HttpOnly; {same_site}; Max-Age={max_age}",
        config.refresh_cookie_path
    )
}

pub fn clear_cookie(config: &AuthConfig) -> String {
    refresh_cookie(config, "", 0)
}

fn append_cookie(response: &mut Response, cookie: &str) {
    match HeaderValue::from_str(cookie) {
        Ok(value) => {
            response.headers_mut().append(header::SET_COOKIE, value);
        }
        Err(e) => error!("Refusing to send malformed cookie: {}", e),
    }
}

/// Value of cookie `name` from the request's `Cookie` headers
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cookie_attributes_follow_same_site() {
        let mut config = AuthConfig::default();
        assert_eq!(
            refresh_cookie(&config, "abc", 60),
            "refresh_token=abc; Path=/auth; HttpOnly; SameSite=Lax; Max-Age=60"
        );

        config.refresh_cookie_same_site = SameSite::None;
        assert!(refresh_cookie(&config, "abc", 60).contains("SameSite=None; Secure"));
        assert!(clear_cookie(&config).contains("Max-Age=0"));
    }

    #[test]
    fn test_cookie_parsing() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("theme=dark; refresh_token=t0k3n"));
        assert_eq!(cookie_value(&headers, "refresh_token").as_deref(), Some("t0k3n"));
        assert_eq!(cookie_value(&headers, "session"), None);
    }
}
