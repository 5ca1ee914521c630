//! OpenClaw allow-list routes: read and rewrite the gateway's
//! allowed-models map through the broker's admin surface.

use std::sync::Arc;

use axum::{extract::State, response::IntoResponse, Json};
use serde::Deserialize;
use serde_json::json;

use crate::openclaw::{self, UpdateMode};

use super::routes::AppState;
use super::ApiError;

#[derive(Debug, Deserialize)]
pub struct AllowedModelsRequest {
    #[serde(default)]
    pub models: Vec<String>,
    pub mode: Option<UpdateMode>,
}

fn join_error(err: tokio::task::JoinError) -> ApiError {
    tracing::error!("openclaw config task failed: {err}");
    ApiError::internal()
}

/// GET /admin/openclaw/allowed-models (admin bearer)
pub async fn admin_get_allowed_models() -> Result<impl IntoResponse, ApiError> {
    let path = openclaw::config_path();
    let file = tokio::task::spawn_blocking(move || openclaw::read_config(&path))
        .await
        .map_err(join_error)??;
    Ok(Json(json!({
        "path": file.path,
        "allowed": openclaw::allowed_models(&file.config),
    })))
}

/// POST /admin/openclaw/allowed-models (admin bearer)
///
/// Mode defaults to merge; an unknown mode is a 400. Every write appends
/// an audit event.
pub async fn admin_set_allowed_models(
    State(state): State<Arc<AppState>>,
    body: axum::body::Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let req: AllowedModelsRequest = super::auth::decode_body(&body)?;
    let mode = req.mode.unwrap_or(UpdateMode::Merge);

    let path = openclaw::config_path();
    let written_path = path.clone();
    let allowed = tokio::task::spawn_blocking(move || {
        openclaw::update_allowed_models(&path, &req.models, mode)
    })
    .await
    .map_err(join_error)??;

    state
        .store
        .append_audit(
            "openclaw.allowlist.update".to_string(),
            Some("openclaw".to_string()),
            None,
            None,
        )
        .await?;

    Ok(Json(json!({
        "ok": true,
        "path": written_path,
        "allowed": allowed,
    })))
}
