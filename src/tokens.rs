//! Access/refresh token lifecycle.
//!
//! Tokens are opaque high-entropy strings; possessing the string is the
//! authorization. Refresh rotates: a brand-new pair is inserted each time
//! and the superseded row is left in place, so the old pair keeps working
//! until its own expiry. There is no revocation.

use rand::RngCore;

use crate::store::{Store, StoreError, TokenRecord};

/// Token material size in bytes before hex encoding.
const TOKEN_BYTES: usize = 32;

#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: i64,
    pub expires_in: i64,
}

#[derive(Clone)]
pub struct TokenService {
    store: Store,
    access_ttl_minutes: i64,
}

fn random_token() -> String {
    let mut buf = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

impl TokenService {
    pub fn new(store: Store, access_ttl_minutes: i64) -> Self {
        Self {
            store,
            access_ttl_minutes,
        }
    }

    /// Mint and persist a fresh access/refresh pair.
    pub async fn issue(
        &self,
        account_id: Option<String>,
        scopes: Option<String>,
    ) -> Result<IssuedToken, StoreError> {
        let now = crate::store::now_ms();
        let expires_at = now + self.access_ttl_minutes * 60_000;
        let record = TokenRecord {
            access_token: random_token(),
            refresh_token: random_token(),
            account_id,
            scopes,
            created_at: now,
            expires_at,
        };
        self.store.insert_token(record.clone()).await?;
        Ok(IssuedToken {
            access_token: record.access_token,
            refresh_token: record.refresh_token,
            expires_at,
            expires_in: (expires_at - now) / 1000,
        })
    }

    /// Look up an access token, treating expiry lazily. Validation never
    /// extends the TTL.
    pub async fn validate(&self, access_token: &str) -> Result<Option<TokenRecord>, StoreError> {
        let record = match self.store.get_token(access_token.to_string()).await? {
            Some(r) => r,
            None => return Ok(None),
        };
        if crate::store::now_ms() >= record.expires_at {
            return Ok(None);
        }
        Ok(Some(record))
    }

    /// Rotate on refresh: mint a new pair preserving account and scopes.
    pub async fn refresh(&self, refresh_token: &str) -> Result<Option<IssuedToken>, StoreError> {
        let existing = match self
            .store
            .get_token_by_refresh(refresh_token.to_string())
            .await?
        {
            Some(r) => r,
            None => return Ok(None),
        };
        let issued = self.issue(existing.account_id, existing.scopes).await?;
        Ok(Some(issued))
    }
}
