//! # clawvault
//!
//! Credential broker for OpenClaw gateways.
//!
//! The service stores third-party secrets and model-proxy credentials
//! encrypted at rest, authorizes client machines via a device-code flow,
//! and issues short-lived access/refresh token pairs. The companion
//! `clawvault-run` launcher injects the current secret set into a child
//! process environment and restarts the child when the set changes,
//! refusing to run at all when the ambient environment already carries
//! secret-shaped variables.
//!
//! ## Modules
//! - `crypto`: envelope encryption for vault payloads (AES-256-GCM)
//! - `vault`: one encrypted record per named tool
//! - `tokens`: access/refresh pair lifecycle (rotate-on-refresh)
//! - `device`: device-code authorization state machine
//! - `guard`: secret-leak classification of environment variable names
//! - `supervisor`: environment injection and child process supervision
//! - `openclaw`: allowed-models management in the gateway config file
//! - `api`: axum HTTP surface
//! - `store`: SQLite persistence shared by all of the above

pub mod api;
pub mod config;
pub mod crypto;
pub mod device;
pub mod guard;
pub mod openclaw;
pub mod store;
pub mod supervisor;
pub mod tokens;
pub mod vault;

pub use config::Config;
pub use store::Store;
