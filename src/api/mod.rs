//! HTTP API: device authorization, token refresh and secrets routes.

pub mod auth;
pub mod openclaw;
pub mod routes;
pub mod secrets;

pub use routes::{serve, AppState};

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::openclaw::OpenclawError;
use crate::store::StoreError;
use crate::vault::VaultError;

/// A typed API failure: a status code plus a stable error code string.
/// Always rendered as `{"error": code}`, never an empty body.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str) -> Self {
        Self { status, code }
    }

    pub fn invalid_request() -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_request")
    }

    pub fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found")
    }

    pub fn unauthorized(code: &'static str) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, code)
    }

    pub fn internal() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.code }))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        tracing::error!("store error: {err}");
        ApiError::internal()
    }
}

/// Vault failures are never masked as absence: a decryption or
/// configuration error aborts the request as a 500-class response.
impl From<VaultError> for ApiError {
    fn from(err: VaultError) -> Self {
        tracing::error!("vault error: {err}");
        ApiError::internal()
    }
}

impl From<OpenclawError> for ApiError {
    fn from(err: OpenclawError) -> Self {
        tracing::error!("openclaw config error: {err}");
        ApiError::internal()
    }
}
