//! Encrypted credential vault.
//!
//! One record per named tool, overwritten on update. Callers get decrypted
//! JSON payloads back and never see ciphertext; a decryption failure is
//! surfaced as an error, never as absence.

use thiserror::Error;

use crate::config::Config;
use crate::crypto::{self, CryptoError, KEY_LENGTH};
use crate::store::{Store, StoreError};

/// Tool name for the injectable environment value set.
pub const ENV_TOOL: &str = "env";

/// Tool name for the upstream model-proxy credentials.
pub const MODEL_PROXY_TOOL: &str = "model-proxy";

#[derive(Debug, Error)]
pub enum VaultError {
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Clone)]
pub struct Vault {
    key: Option<[u8; KEY_LENGTH]>,
    store: Store,
}

impl Vault {
    /// Build a vault from the immutable service configuration.
    ///
    /// A missing master key does not fail construction; the server can still
    /// run the device flow. Every encrypt/decrypt call on a keyless vault
    /// fails with `CryptoError::MissingMasterKey`.
    pub fn new(config: &Config, store: Store) -> Self {
        let key = if config.master_key.trim().is_empty() {
            None
        } else {
            crypto::derive_key(&config.master_key).ok()
        };
        Self { key, store }
    }

    #[cfg(test)]
    pub fn with_master_key(master_key: &str, store: Store) -> Self {
        Self {
            key: crypto::derive_key(master_key).ok(),
            store,
        }
    }

    fn key(&self) -> Result<&[u8; KEY_LENGTH], CryptoError> {
        self.key.as_ref().ok_or(CryptoError::MissingMasterKey)
    }

    /// Encrypt `payload` and replace any existing record for `tool`.
    pub async fn upsert(
        &self,
        tool: &str,
        payload: &serde_json::Value,
        metadata: Option<&serde_json::Value>,
    ) -> Result<(), VaultError> {
        let ciphertext = crypto::encrypt_json(self.key()?, payload)?;
        let metadata = metadata.map(|m| m.to_string());
        self.store
            .upsert_credential(tool.to_string(), ciphertext, metadata)
            .await?;
        Ok(())
    }

    /// Decrypt and return the payload for `tool`, or `None` when no record
    /// exists. Decryption failures propagate.
    pub async fn read(&self, tool: &str) -> Result<Option<serde_json::Value>, VaultError> {
        let ciphertext = match self.store.credential_payload(tool.to_string()).await? {
            Some(c) => c,
            None => return Ok(None),
        };
        let payload = crypto::decrypt_json(self.key()?, &ciphertext)?;
        Ok(Some(payload))
    }

    /// Existence check without decrypting anything.
    pub async fn exists(&self, tool: &str) -> Result<bool, VaultError> {
        Ok(self.store.credential_exists(tool.to_string()).await?)
    }
}
