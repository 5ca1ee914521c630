//! SQLite persistence for credentials, device sessions, tokens and the
//! audit log.
//!
//! The connection is shared behind a mutex and every query runs on the
//! blocking pool. Credential payloads are stored only as opaque ciphertext
//! plus the cleartext tool name and a timestamp; plaintext secrets never
//! touch the database.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

const SCHEMA: &str = r#"
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS credentials (
    tool TEXT PRIMARY KEY NOT NULL,
    payload TEXT NOT NULL,
    metadata TEXT,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS device_sessions (
    device_code TEXT PRIMARY KEY NOT NULL,
    user_code TEXT NOT NULL,
    status TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    expires_at INTEGER NOT NULL,
    approved_at INTEGER,
    account_id TEXT,
    scopes TEXT
);

CREATE INDEX IF NOT EXISTS idx_device_sessions_user_code ON device_sessions(user_code);

CREATE TABLE IF NOT EXISTS tokens (
    access_token TEXT PRIMARY KEY NOT NULL,
    refresh_token TEXT NOT NULL,
    account_id TEXT,
    scopes TEXT,
    created_at INTEGER NOT NULL,
    expires_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_tokens_refresh ON tokens(refresh_token);

CREATE TABLE IF NOT EXISTS audit_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    action TEXT NOT NULL,
    tool TEXT,
    account_id TEXT,
    created_at INTEGER NOT NULL,
    meta TEXT
);
"#;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("database task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("failed to prepare database directory: {0}")]
    Io(#[from] std::io::Error),
}

/// Current time in unix milliseconds.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    Pending,
    Approved,
    Denied,
}

impl DeviceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceStatus::Pending => "pending",
            DeviceStatus::Approved => "approved",
            DeviceStatus::Denied => "denied",
        }
    }

    fn parse(s: &str) -> DeviceStatus {
        match s {
            "approved" => DeviceStatus::Approved,
            "denied" => DeviceStatus::Denied,
            _ => DeviceStatus::Pending,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeviceSession {
    pub device_code: String,
    pub user_code: String,
    pub status: DeviceStatus,
    pub created_at: i64,
    pub expires_at: i64,
    pub approved_at: Option<i64>,
    pub account_id: Option<String>,
    pub scopes: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TokenRecord {
    pub access_token: String,
    pub refresh_token: String,
    pub account_id: Option<String>,
    pub scopes: Option<String>,
    pub created_at: i64,
    pub expires_at: i64,
}

/// Shared handle to the SQLite database. Cheap to clone.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let path = path.to_path_buf();
        let conn = tokio::task::spawn_blocking(move || -> Result<Connection, rusqlite::Error> {
            let conn = Connection::open(path)?;
            conn.execute_batch(SCHEMA)?;
            Ok(conn)
        })
        .await??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a query on the blocking pool with the connection locked.
    async fn call<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, rusqlite::Error> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let result = tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            f(&conn)
        })
        .await??;
        Ok(result)
    }

    // ------------------------------------------------------------------
    // Credentials
    // ------------------------------------------------------------------

    /// Insert or fully replace the encrypted payload for a tool.
    pub async fn upsert_credential(
        &self,
        tool: String,
        ciphertext: String,
        metadata: Option<String>,
    ) -> Result<(), StoreError> {
        let updated_at = now_ms();
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO credentials (tool, payload, metadata, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(tool) DO UPDATE SET
                     payload = excluded.payload,
                     metadata = excluded.metadata,
                     updated_at = excluded.updated_at",
                params![tool, ciphertext, metadata, updated_at],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn credential_payload(&self, tool: String) -> Result<Option<String>, StoreError> {
        self.call(move |conn| {
            conn.query_row(
                "SELECT payload FROM credentials WHERE tool = ?1",
                params![tool],
                |row| row.get(0),
            )
            .optional()
        })
        .await
    }

    /// Existence check that never touches the ciphertext column.
    pub async fn credential_exists(&self, tool: String) -> Result<bool, StoreError> {
        self.call(move |conn| {
            conn.prepare("SELECT 1 FROM credentials WHERE tool = ?1 LIMIT 1")?
                .exists(params![tool])
        })
        .await
    }

    // ------------------------------------------------------------------
    // Device sessions
    // ------------------------------------------------------------------

    pub async fn insert_device_session(&self, session: DeviceSession) -> Result<(), StoreError> {
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO device_sessions
                     (device_code, user_code, status, created_at, expires_at,
                      approved_at, account_id, scopes)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    session.device_code,
                    session.user_code,
                    session.status.as_str(),
                    session.created_at,
                    session.expires_at,
                    session.approved_at,
                    session.account_id,
                    session.scopes,
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_device_session(
        &self,
        device_code: String,
    ) -> Result<Option<DeviceSession>, StoreError> {
        self.call(move |conn| {
            conn.query_row(
                "SELECT device_code, user_code, status, created_at, expires_at,
                        approved_at, account_id, scopes
                 FROM device_sessions WHERE device_code = ?1",
                params![device_code],
                map_device_row,
            )
            .optional()
        })
        .await
    }

    pub async fn get_device_session_by_user_code(
        &self,
        user_code: String,
    ) -> Result<Option<DeviceSession>, StoreError> {
        self.call(move |conn| {
            conn.query_row(
                "SELECT device_code, user_code, status, created_at, expires_at,
                        approved_at, account_id, scopes
                 FROM device_sessions WHERE user_code = ?1",
                params![user_code],
                map_device_row,
            )
            .optional()
        })
        .await
    }

    /// Transition a session. Approval stamps `approved_at`; any other status
    /// clears it.
    pub async fn update_device_status(
        &self,
        device_code: String,
        status: DeviceStatus,
    ) -> Result<(), StoreError> {
        let approved_at = match status {
            DeviceStatus::Approved => Some(now_ms()),
            _ => None,
        };
        self.call(move |conn| {
            conn.execute(
                "UPDATE device_sessions SET status = ?2, approved_at = ?3
                 WHERE device_code = ?1",
                params![device_code, status.as_str(), approved_at],
            )?;
            Ok(())
        })
        .await
    }

    // ------------------------------------------------------------------
    // Tokens
    // ------------------------------------------------------------------

    pub async fn insert_token(&self, record: TokenRecord) -> Result<(), StoreError> {
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO tokens
                     (access_token, refresh_token, account_id, scopes, created_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.access_token,
                    record.refresh_token,
                    record.account_id,
                    record.scopes,
                    record.created_at,
                    record.expires_at,
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_token(
        &self,
        access_token: String,
    ) -> Result<Option<TokenRecord>, StoreError> {
        self.call(move |conn| {
            conn.query_row(
                "SELECT access_token, refresh_token, account_id, scopes, created_at, expires_at
                 FROM tokens WHERE access_token = ?1",
                params![access_token],
                map_token_row,
            )
            .optional()
        })
        .await
    }

    pub async fn get_token_by_refresh(
        &self,
        refresh_token: String,
    ) -> Result<Option<TokenRecord>, StoreError> {
        self.call(move |conn| {
            conn.query_row(
                "SELECT access_token, refresh_token, account_id, scopes, created_at, expires_at
                 FROM tokens WHERE refresh_token = ?1",
                params![refresh_token],
                map_token_row,
            )
            .optional()
        })
        .await
    }

    // ------------------------------------------------------------------
    // Audit log (append-only)
    // ------------------------------------------------------------------

    pub async fn append_audit(
        &self,
        action: String,
        tool: Option<String>,
        account_id: Option<String>,
        meta: Option<serde_json::Value>,
    ) -> Result<(), StoreError> {
        let created_at = now_ms();
        let meta = meta.map(|m| m.to_string());
        self.call(move |conn| {
            conn.execute(
                "INSERT INTO audit_log (action, tool, account_id, created_at, meta)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![action, tool, account_id, created_at, meta],
            )?;
            Ok(())
        })
        .await
    }
}

fn map_device_row(row: &rusqlite::Row<'_>) -> Result<DeviceSession, rusqlite::Error> {
    let status: String = row.get(2)?;
    Ok(DeviceSession {
        device_code: row.get(0)?,
        user_code: row.get(1)?,
        status: DeviceStatus::parse(&status),
        created_at: row.get(3)?,
        expires_at: row.get(4)?,
        approved_at: row.get(5)?,
        account_id: row.get(6)?,
        scopes: row.get(7)?,
    })
}

fn map_token_row(row: &rusqlite::Row<'_>) -> Result<TokenRecord, rusqlite::Error> {
    Ok(TokenRecord {
        access_token: row.get(0)?,
        refresh_token: row.get(1)?,
        account_id: row.get(2)?,
        scopes: row.get(3)?,
        created_at: row.get(4)?,
        expires_at: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_credential_upsert_replaces() {
        let store = Store::open_in_memory().unwrap();

        store
            .upsert_credential("env".into(), "cipher-one".into(), None)
            .await
            .unwrap();
        store
            .upsert_credential("env".into(), "cipher-two".into(), Some("{}".into()))
            .await
            .unwrap();

        let payload = store.credential_payload("env".into()).await.unwrap();
        assert_eq!(payload.as_deref(), Some("cipher-two"));
        assert!(store.credential_exists("env".into()).await.unwrap());
        assert!(!store.credential_exists("unknown-tool".into()).await.unwrap());
    }

    #[tokio::test]
    async fn test_device_session_lookup_by_user_code() {
        let store = Store::open_in_memory().unwrap();
        let session = DeviceSession {
            device_code: "abc123".into(),
            user_code: "AAAA-BBBB".into(),
            status: DeviceStatus::Pending,
            created_at: now_ms(),
            expires_at: now_ms() + 600_000,
            approved_at: None,
            account_id: Some("acct".into()),
            scopes: Some("read write".into()),
        };
        store.insert_device_session(session).await.unwrap();

        let found = store
            .get_device_session_by_user_code("AAAA-BBBB".into())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.device_code, "abc123");
        assert_eq!(found.status, DeviceStatus::Pending);

        store
            .update_device_status("abc123".into(), DeviceStatus::Approved)
            .await
            .unwrap();
        let approved = store
            .get_device_session("abc123".into())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(approved.status, DeviceStatus::Approved);
        assert!(approved.approved_at.is_some());
    }

    #[tokio::test]
    async fn test_token_lookup_by_refresh() {
        let store = Store::open_in_memory().unwrap();
        let record = TokenRecord {
            access_token: "access-1".into(),
            refresh_token: "refresh-1".into(),
            account_id: None,
            scopes: None,
            created_at: now_ms(),
            expires_at: now_ms() + 3_600_000,
        };
        store.insert_token(record).await.unwrap();

        assert!(store.get_token("access-1".into()).await.unwrap().is_some());
        assert!(store.get_token("missing".into()).await.unwrap().is_none());
        let by_refresh = store
            .get_token_by_refresh("refresh-1".into())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_refresh.access_token, "access-1");
    }

    #[tokio::test]
    async fn test_open_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("clawvault.db");
        let store = Store::open(&path).await.unwrap();
        store
            .append_audit("secrets.update".into(), Some("env".into()), None, None)
            .await
            .unwrap();
        assert!(path.exists());
    }
}
