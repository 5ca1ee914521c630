//! Secrets routes: the injectable env value set and the model-proxy
//! credentials. Admin writes pair every upsert with an audit event.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::vault::{ENV_TOOL, MODEL_PROXY_TOOL};

use super::routes::AppState;
use super::ApiError;

#[derive(Debug, Serialize, Deserialize)]
pub struct EnvValues {
    pub values: HashMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ModelProxyConfig {
    #[serde(rename = "baseUrl")]
    pub base_url: String,
    #[serde(rename = "apiKey")]
    pub api_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
pub struct EnvQuery {
    pub keys: Option<String>,
}

/// GET /secrets/env?keys=a,b (access-token bearer)
///
/// Returns the vault-held value set, filtered to `keys` when given. An
/// unconfigured vault record is an empty map, not an error.
pub async fn get_env(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EnvQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let payload = read_env_values(&state).await?;

    let keys: Vec<String> = query
        .keys
        .unwrap_or_default()
        .split(',')
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .collect();
    if keys.is_empty() {
        return Ok(Json(payload));
    }

    let mut filtered = HashMap::new();
    for key in keys {
        if let Some(value) = payload.values.get(&key) {
            filtered.insert(key, value.clone());
        }
    }
    Ok(Json(EnvValues { values: filtered }))
}

/// GET /admin/secrets/env (admin bearer)
pub async fn admin_get_env(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(read_env_values(&state).await?))
}

/// POST /admin/secrets/env (admin bearer)
pub async fn admin_set_env(
    State(state): State<Arc<AppState>>,
    body: axum::body::Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let body: EnvValues = super::auth::decode_body(&body)?;
    let payload = serde_json::to_value(&body).map_err(|_| ApiError::invalid_request())?;
    state.vault.upsert(ENV_TOOL, &payload, None).await?;
    state
        .store
        .append_audit(
            "secrets.update".to_string(),
            Some(ENV_TOOL.to_string()),
            None,
            None,
        )
        .await?;
    Ok(Json(json!({ "ok": true })))
}

/// GET /admin/secrets/model-proxy (admin bearer)
pub async fn admin_get_model_proxy(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    match state.vault.read(MODEL_PROXY_TOOL).await? {
        Some(payload) => Ok(Json(payload)),
        None => Err(ApiError::new(
            axum::http::StatusCode::NOT_FOUND,
            "not_configured",
        )),
    }
}

/// GET /admin/secrets/model-proxy/status (admin bearer)
///
/// Existence check only; never decrypts or exposes key material.
pub async fn admin_model_proxy_status(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let exists = state.vault.exists(MODEL_PROXY_TOOL).await?;
    Ok(Json(json!({ "exists": exists })))
}

/// POST /admin/secrets/model-proxy (admin bearer)
pub async fn admin_set_model_proxy(
    State(state): State<Arc<AppState>>,
    body: axum::body::Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let body: ModelProxyConfig = super::auth::decode_body(&body)?;
    if body.base_url.trim().is_empty() || body.api_key.trim().is_empty() {
        return Err(ApiError::invalid_request());
    }
    let payload = serde_json::to_value(&body).map_err(|_| ApiError::invalid_request())?;
    state.vault.upsert(MODEL_PROXY_TOOL, &payload, None).await?;
    state
        .store
        .append_audit(
            "secrets.update".to_string(),
            Some(MODEL_PROXY_TOOL.to_string()),
            None,
            None,
        )
        .await?;
    Ok(Json(json!({ "ok": true })))
}

async fn read_env_values(state: &AppState) -> Result<EnvValues, ApiError> {
    match state.vault.read(ENV_TOOL).await? {
        Some(payload) => {
            let values = serde_json::from_value(payload).map_err(|e| {
                tracing::error!("stored env payload has unexpected shape: {e}");
                ApiError::internal()
            })?;
            Ok(values)
        }
        None => Ok(EnvValues {
            values: HashMap::new(),
        }),
    }
}
