//! Configuration for the clawvault service.
//!
//! All settings come from environment variables, read once at the
//! composition root:
//! - `CLAWVAULT_HOST` - Optional. Server host. Defaults to `127.0.0.1`.
//! - `CLAWVAULT_PORT` - Optional. Server port. Defaults to `8791`.
//! - `CLAWVAULT_BASE_URL` - Optional. Public base URL of this service.
//! - `CLAWVAULT_WEB_URL` - Optional. Approval console URL; the device flow
//!   points approvers at `<web_url>/device`.
//! - `CLAWVAULT_MASTER_KEY` - Vault master secret. Without it the vault is
//!   inoperable (the device flow still works).
//! - `CLAWVAULT_ADMIN_TOKEN` - Optional. Bearer token for admin routes;
//!   when unset, admin routes are open (operator responsibility).
//! - `CLAWVAULT_ACCESS_TTL_MINUTES` - Optional. Access-token TTL. Defaults
//!   to `60`.
//! - `CLAWVAULT_DB_PATH` - Optional. SQLite path. Defaults to
//!   `./data/clawvault.db`.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Immutable service configuration, passed by reference into every
/// component constructor. Only the composition roots read process state.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind host
    pub host: String,

    /// Server bind port
    pub port: u16,

    /// Public base URL of this service
    pub base_url: String,

    /// Approval console URL used for the device verification link
    pub web_url: String,

    /// Vault master secret (may be empty: vault inoperable)
    pub master_key: String,

    /// Admin bearer token (may be empty: admin routes open)
    pub admin_token: String,

    /// Access-token TTL in minutes
    pub access_ttl_minutes: i64,

    /// SQLite database path
    pub db_path: PathBuf,
}

fn env_trimmed(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = env_trimmed("CLAWVAULT_HOST").unwrap_or_else(|| "127.0.0.1".to_string());

        let port = env_trimmed("CLAWVAULT_PORT")
            .unwrap_or_else(|| "8791".to_string())
            .parse()
            .map_err(|e| {
                ConfigError::InvalidValue("CLAWVAULT_PORT".to_string(), format!("{}", e))
            })?;

        let base_url = env_trimmed("CLAWVAULT_BASE_URL")
            .unwrap_or_else(|| "http://localhost:8791".to_string());

        let web_url =
            env_trimmed("CLAWVAULT_WEB_URL").unwrap_or_else(|| "http://localhost:5173".to_string());

        let master_key = env_trimmed("CLAWVAULT_MASTER_KEY").unwrap_or_default();
        let admin_token = env_trimmed("CLAWVAULT_ADMIN_TOKEN").unwrap_or_default();

        let access_ttl_minutes = env_trimmed("CLAWVAULT_ACCESS_TTL_MINUTES")
            .unwrap_or_else(|| "60".to_string())
            .parse()
            .map_err(|e| {
                ConfigError::InvalidValue(
                    "CLAWVAULT_ACCESS_TTL_MINUTES".to_string(),
                    format!("{}", e),
                )
            })?;

        let db_path = env_trimmed("CLAWVAULT_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./data/clawvault.db"));

        Ok(Self {
            host,
            port,
            base_url,
            web_url,
            master_key,
            admin_token,
            access_ttl_minutes,
            db_path,
        })
    }

    /// Create a config with custom values (useful for testing).
    pub fn new(master_key: String, admin_token: String, db_path: PathBuf) -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8791,
            base_url: "http://localhost:8791".to_string(),
            web_url: "http://localhost:5173".to_string(),
            master_key,
            admin_token,
            access_ttl_minutes: 60,
            db_path,
        }
    }
}
