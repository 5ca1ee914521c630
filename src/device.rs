//! Device authorization flow.
//!
//! A caller starts a pending session and polls with its long device code
//! while an operator approves or denies out-of-band using the short user
//! code. Sessions transition pending → approved/denied; expiry is computed
//! lazily at read time, there is no background sweep.

use rand::Rng;

use crate::store::{DeviceSession, DeviceStatus, Store, StoreError};
use crate::tokens::{IssuedToken, TokenService};

/// Session lifetime: 10 minutes.
const SESSION_TTL_MS: i64 = 10 * 60_000;

/// Advisory polling cadence communicated to callers, in seconds.
const POLL_INTERVAL_SECS: i64 = 5;

const DEVICE_CODE_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const USER_CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

#[derive(Debug, Clone)]
pub struct StartedSession {
    pub device_code: String,
    pub user_code: String,
    pub verification_url: String,
    pub expires_in: i64,
    pub interval: i64,
}

#[derive(Debug)]
pub enum PollOutcome {
    /// Unknown device code.
    Invalid,
    /// Session is past its TTL.
    Expired,
    /// No terminal state yet; keep polling.
    Pending,
    Denied,
    /// Approved; a token pair is minted fresh on every poll.
    Approved(IssuedToken),
}

#[derive(Clone)]
pub struct DeviceFlow {
    store: Store,
    tokens: TokenService,
    web_url: String,
}

fn random_code(len: usize, alphabet: &[u8]) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| alphabet[rng.gen_range(0..alphabet.len())] as char)
        .collect()
}

impl DeviceFlow {
    pub fn new(store: Store, tokens: TokenService, web_url: String) -> Self {
        Self {
            store,
            tokens,
            web_url,
        }
    }

    /// Create a pending session and return the codes the caller needs.
    pub async fn start(
        &self,
        account_id: Option<String>,
        scopes: Option<Vec<String>>,
    ) -> Result<StartedSession, StoreError> {
        let device_code = random_code(32, DEVICE_CODE_ALPHABET);
        let user_code = format!(
            "{}-{}",
            random_code(4, USER_CODE_ALPHABET),
            random_code(4, USER_CODE_ALPHABET)
        );
        let now = crate::store::now_ms();
        let expires_at = now + SESSION_TTL_MS;

        self.store
            .insert_device_session(DeviceSession {
                device_code: device_code.clone(),
                user_code: user_code.clone(),
                status: DeviceStatus::Pending,
                created_at: now,
                expires_at,
                approved_at: None,
                account_id,
                scopes: scopes.map(|s| s.join(" ")),
            })
            .await?;

        Ok(StartedSession {
            device_code,
            user_code,
            verification_url: format!("{}/device", self.web_url.trim_end_matches('/')),
            expires_in: (expires_at - now) / 1000,
            interval: POLL_INTERVAL_SECS,
        })
    }

    /// Approve a session by user code. Returns `None` for unknown or
    /// already-expired sessions. Re-approving simply re-stamps the approval
    /// time.
    pub async fn approve(&self, user_code: &str) -> Result<Option<DeviceSession>, StoreError> {
        let user_code = user_code.trim().to_uppercase();
        let session = match self
            .store
            .get_device_session_by_user_code(user_code)
            .await?
        {
            Some(s) => s,
            None => return Ok(None),
        };
        if crate::store::now_ms() >= session.expires_at {
            return Ok(None);
        }
        self.store
            .update_device_status(session.device_code.clone(), DeviceStatus::Approved)
            .await?;
        Ok(Some(session))
    }

    /// Deny a session by user code. Denying an expired session is harmless
    /// and idempotent, so no expiry check is made.
    pub async fn deny(&self, user_code: &str) -> Result<Option<DeviceSession>, StoreError> {
        let user_code = user_code.trim().to_uppercase();
        let session = match self
            .store
            .get_device_session_by_user_code(user_code)
            .await?
        {
            Some(s) => s,
            None => return Ok(None),
        };
        self.store
            .update_device_status(session.device_code.clone(), DeviceStatus::Denied)
            .await?;
        Ok(Some(session))
    }

    /// Resolve a poll. Each poll of an approved session mints a new token
    /// pair; callers stop polling once they observe a terminal state.
    pub async fn poll(&self, device_code: &str) -> Result<PollOutcome, StoreError> {
        let session = match self
            .store
            .get_device_session(device_code.to_string())
            .await?
        {
            Some(s) => s,
            None => return Ok(PollOutcome::Invalid),
        };
        if crate::store::now_ms() >= session.expires_at {
            return Ok(PollOutcome::Expired);
        }
        match session.status {
            DeviceStatus::Pending => Ok(PollOutcome::Pending),
            DeviceStatus::Denied => Ok(PollOutcome::Denied),
            DeviceStatus::Approved => {
                let token = self
                    .tokens
                    .issue(session.account_id, session.scopes)
                    .await?;
                Ok(PollOutcome::Approved(token))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flow() -> DeviceFlow {
        let store = Store::open_in_memory().unwrap();
        let tokens = TokenService::new(store.clone(), 60);
        DeviceFlow::new(store, tokens, "http://localhost:5173".into())
    }

    #[tokio::test]
    async fn test_start_shapes_codes() {
        let flow = flow();
        let started = flow.start(None, None).await.unwrap();

        assert_eq!(started.device_code.len(), 32);
        assert!(started
            .device_code
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
        assert_eq!(started.user_code.len(), 9);
        assert_eq!(started.user_code.as_bytes()[4], b'-');
        assert_eq!(started.verification_url, "http://localhost:5173/device");
        assert_eq!(started.expires_in, 600);
        assert_eq!(started.interval, 5);
    }

    #[tokio::test]
    async fn test_poll_pending_then_approved() {
        let flow = flow();
        let started = flow
            .start(Some("acct".into()), Some(vec!["read".into()]))
            .await
            .unwrap();

        assert!(matches!(
            flow.poll(&started.device_code).await.unwrap(),
            PollOutcome::Pending
        ));

        // Approval is case-insensitive on the user code.
        let approved = flow
            .approve(&started.user_code.to_lowercase())
            .await
            .unwrap();
        assert!(approved.is_some());

        match flow.poll(&started.device_code).await.unwrap() {
            PollOutcome::Approved(token) => {
                assert_eq!(token.expires_in, 3600);
            }
            other => panic!("expected approved, got {:?}", other),
        }

        // Repeated polls mint fresh pairs, no dedup.
        let first = match flow.poll(&started.device_code).await.unwrap() {
            PollOutcome::Approved(t) => t,
            other => panic!("expected approved, got {:?}", other),
        };
        let second = match flow.poll(&started.device_code).await.unwrap() {
            PollOutcome::Approved(t) => t,
            other => panic!("expected approved, got {:?}", other),
        };
        assert_ne!(first.access_token, second.access_token);
    }

    #[tokio::test]
    async fn test_poll_denied() {
        let flow = flow();
        let started = flow.start(None, None).await.unwrap();

        assert!(flow.deny(&started.user_code).await.unwrap().is_some());
        assert!(matches!(
            flow.poll(&started.device_code).await.unwrap(),
            PollOutcome::Denied
        ));
    }

    #[tokio::test]
    async fn test_poll_unknown_and_expired() {
        let flow = flow();
        assert!(matches!(
            flow.poll("does-not-exist").await.unwrap(),
            PollOutcome::Invalid
        ));

        // Insert a session already past its TTL.
        let store = Store::open_in_memory().unwrap();
        let tokens = TokenService::new(store.clone(), 60);
        let flow = DeviceFlow::new(store.clone(), tokens, "http://x".into());
        store
            .insert_device_session(DeviceSession {
                device_code: "stale-code".into(),
                user_code: "STAL-EOLD".into(),
                status: DeviceStatus::Pending,
                created_at: 0,
                expires_at: 1,
                approved_at: None,
                account_id: None,
                scopes: None,
            })
            .await
            .unwrap();

        assert!(matches!(
            flow.poll("stale-code").await.unwrap(),
            PollOutcome::Expired
        ));
        // Approve refuses expired sessions; deny does not care.
        assert!(flow.approve("STAL-EOLD").await.unwrap().is_none());
        assert!(flow.deny("STAL-EOLD").await.unwrap().is_some());
    }
}
