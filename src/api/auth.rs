//! Device authorization and token routes, plus the bearer middleware.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::device::PollOutcome;
use crate::tokens::IssuedToken;

use super::routes::AppState;
use super::ApiError;

fn bearer_token(req: &Request<Body>) -> Option<&str> {
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Admin bearer middleware. When no admin token is configured the routes
/// are open; that is a documented operator responsibility.
pub async fn require_admin(
    State(state): State<Arc<AppState>>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    if state.config.admin_token.is_empty() {
        return Ok(next.run(req).await);
    }
    let authorized = bearer_token(&req)
        .map(|token| token == state.config.admin_token)
        .unwrap_or(false);
    if authorized {
        Ok(next.run(req).await)
    } else {
        Err(ApiError::unauthorized("unauthorized"))
    }
}

/// Access-token bearer middleware backed by the token lifecycle.
pub async fn require_access_token(
    State(state): State<Arc<AppState>>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let token = match bearer_token(&req) {
        Some(token) => token.to_string(),
        None => return Err(ApiError::unauthorized("missing_token")),
    };
    let record = state
        .tokens
        .validate(&token)
        .await?
        .ok_or_else(|| ApiError::unauthorized("invalid_token"))?;
    req.extensions_mut().insert(record);
    Ok(next.run(req).await)
}

/// Decode a request body, mapping any parse or shape mismatch to a 400
/// `invalid_request` instead of axum's default rejection. An empty body
/// reads as `{}` so requests whose fields are all optional stay valid.
pub(super) fn decode_body<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    let body = if body.is_empty() { b"{}".as_slice() } else { body };
    serde_json::from_slice(body).map_err(|_| ApiError::invalid_request())
}

#[derive(Debug, Deserialize)]
pub struct DeviceStartRequest {
    #[serde(rename = "accountId")]
    pub account_id: Option<String>,
    pub scopes: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct DevicePollRequest {
    pub device_code: String,
}

#[derive(Debug, Deserialize)]
pub struct UserCodeRequest {
    pub user_code: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
    pub token_type: &'static str,
}

impl From<IssuedToken> for TokenResponse {
    fn from(token: IssuedToken) -> Self {
        Self {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_in: token.expires_in,
            token_type: "bearer",
        }
    }
}

/// POST /device/start
pub async fn device_start(
    State(state): State<Arc<AppState>>,
    body: axum::body::Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let req: DeviceStartRequest = decode_body(&body)?;
    let session = state.device.start(req.account_id, req.scopes).await?;
    Ok(Json(json!({
        "device_code": session.device_code,
        "user_code": session.user_code,
        "verification_url": session.verification_url,
        "expires_in": session.expires_in,
        "interval": session.interval,
    })))
}

/// POST /device/poll
pub async fn device_poll(
    State(state): State<Arc<AppState>>,
    body: axum::body::Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let req: DevicePollRequest = decode_body(&body)?;
    if req.device_code.len() < 10 {
        return Err(ApiError::invalid_request());
    }
    match state.device.poll(&req.device_code).await? {
        PollOutcome::Pending => Err(ApiError::new(
            StatusCode::ACCEPTED,
            "authorization_pending",
        )),
        PollOutcome::Denied => Err(ApiError::new(StatusCode::FORBIDDEN, "access_denied")),
        PollOutcome::Expired => Err(ApiError::new(StatusCode::GONE, "expired_token")),
        PollOutcome::Invalid => Err(ApiError::new(StatusCode::BAD_REQUEST, "invalid_device_code")),
        PollOutcome::Approved(token) => Ok(Json(TokenResponse::from(token))),
    }
}

/// POST /device/approve (admin)
pub async fn device_approve(
    State(state): State<Arc<AppState>>,
    body: axum::body::Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let req: UserCodeRequest = decode_body(&body)?;
    if req.user_code.trim().len() < 4 {
        return Err(ApiError::invalid_request());
    }
    match state.device.approve(&req.user_code).await? {
        Some(_) => Ok(Json(json!({ "ok": true }))),
        None => Err(ApiError::not_found()),
    }
}

/// POST /device/deny (admin)
pub async fn device_deny(
    State(state): State<Arc<AppState>>,
    body: axum::body::Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let req: UserCodeRequest = decode_body(&body)?;
    if req.user_code.trim().len() < 4 {
        return Err(ApiError::invalid_request());
    }
    match state.device.deny(&req.user_code).await? {
        Some(_) => Ok(Json(json!({ "ok": true }))),
        None => Err(ApiError::not_found()),
    }
}

/// POST /token/refresh
pub async fn token_refresh(
    State(state): State<Arc<AppState>>,
    body: axum::body::Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let req: RefreshRequest = decode_body(&body)?;
    if req.refresh_token.len() < 10 {
        return Err(ApiError::invalid_request());
    }
    match state.tokens.refresh(&req.refresh_token).await? {
        Some(token) => Ok(Json(TokenResponse::from(token))),
        None => Err(ApiError::unauthorized("invalid_refresh_token")),
    }
}
