//! Router assembly and shared application state.

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::device::DeviceFlow;
use crate::store::Store;
use crate::tokens::TokenService;
use crate::vault::Vault;

use super::auth;
use super::openclaw;
use super::secrets;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub store: Store,
    pub vault: Vault,
    pub tokens: TokenService,
    pub device: DeviceFlow,
}

impl AppState {
    pub fn new(config: Config, store: Store) -> Self {
        let vault = Vault::new(&config, store.clone());
        let tokens = TokenService::new(store.clone(), config.access_ttl_minutes);
        let device = DeviceFlow::new(store.clone(), tokens.clone(), config.web_url.clone());
        Self {
            config,
            store,
            vault,
            tokens,
            device,
        }
    }
}

/// Build the full application router.
pub fn router(state: Arc<AppState>) -> Router {
    let public_routes = Router::new()
        .route("/health", get(health))
        .route("/device/start", post(auth::device_start))
        .route("/device/poll", post(auth::device_poll))
        .route("/token/refresh", post(auth::token_refresh));

    let token_routes = Router::new()
        .route("/secrets/env", get(secrets::get_env))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            auth::require_access_token,
        ));

    let admin_routes = Router::new()
        .route("/device/approve", post(auth::device_approve))
        .route("/device/deny", post(auth::device_deny))
        .route(
            "/admin/secrets/env",
            get(secrets::admin_get_env).post(secrets::admin_set_env),
        )
        .route(
            "/admin/secrets/model-proxy",
            get(secrets::admin_get_model_proxy).post(secrets::admin_set_model_proxy),
        )
        .route(
            "/admin/secrets/model-proxy/status",
            get(secrets::admin_model_proxy_status),
        )
        .route(
            "/admin/openclaw/allowed-models",
            get(openclaw::admin_get_allowed_models).post(openclaw::admin_set_allowed_models),
        )
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            auth::require_admin,
        ));

    Router::new()
        .merge(public_routes)
        .merge(token_routes)
        .merge(admin_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let store = Store::open(&config.db_path).await?;
    if config.master_key.trim().is_empty() {
        tracing::warn!(
            "CLAWVAULT_MASTER_KEY is not set; the credential vault is inoperable until it is"
        );
    }
    if config.admin_token.is_empty() {
        tracing::warn!("CLAWVAULT_ADMIN_TOKEN is not set; admin routes are open");
    }

    let addr = format!("{}:{}", config.host, config.port);
    let state = Arc::new(AppState::new(config, store));
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Wait for SIGTERM/SIGINT.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "ok": true }))
}
