//! Environment-injection supervisor.
//!
//! Fetches the vault-held value set over the bearer-token HTTP contract,
//! builds a child environment (full ambient or clean allow-list, injected
//! values winning on collision), and either runs a command once or keeps a
//! long-lived child running, restarting it whenever the fetched value set
//! drifts.
//!
//! The supervised loop is a single `tokio::select!` over the poll timer and
//! the child-exit notification. Restarts happen inline in the timer branch,
//! so a restart in flight can never be re-entered by a later tick, and the
//! exit we caused ourselves is never mistaken for the child dying on its
//! own. A failed fetch keeps the last-known-good environment in force.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::process::{Child, Command};
use tracing::{info, warn};

/// Environment names passed through by default in clean mode.
pub const DEFAULT_CLEAN_ALLOW: [&str; 4] = ["PATH", "HOME", "SHELL", "LANG"];

/// Default polling cadence for the supervised mode, in seconds.
pub const DEFAULT_INTERVAL_SECS: u64 = 5;

/// How long to wait after SIGTERM before force-killing a child.
const GRACEFUL_STOP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum SupervisorError {
    /// Ambient environment carries secret-shaped variables. Always fatal;
    /// mapped to exit code 2 by the launcher.
    #[error("direct secret env vars detected: {}. Refusing to run. Store secrets in clawvault and inject via clawvault-run.", .0.join(", "))]
    SecretLeak(Vec<String>),

    #[error("secret fetch failed ({0})")]
    FetchStatus(u16),

    #[error("secret fetch failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("failed to spawn {0}: {1}")]
    Spawn(String, std::io::Error),

    #[error("failed to wait for child: {0}")]
    Wait(std::io::Error),
}

#[derive(Debug, Deserialize)]
struct EnvValuesResponse {
    #[serde(default)]
    values: HashMap<String, String>,
}

/// Hash a value set order-independently: sort by key, then digest the
/// NUL-delimited pairs with SHA-256.
pub fn hash_values(values: &HashMap<String, String>) -> String {
    let mut entries: Vec<(&String, &String)> = values.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));

    let mut hasher = Sha256::new();
    for (key, value) in entries {
        hasher.update(key.as_bytes());
        hasher.update([0]);
        hasher.update(value.as_bytes());
        hasher.update([0]);
    }
    hex::encode(hasher.finalize())
}

/// Build the child environment.
///
/// With `clean_allow` set, only the allow-listed names plus reserved-prefix
/// variables survive from the ambient environment. Injected values always
/// override on key collision.
pub fn build_env(
    ambient: &HashMap<String, String>,
    clean_allow: Option<&[String]>,
    injected: &HashMap<String, String>,
) -> HashMap<String, String> {
    let mut env = match clean_allow {
        Some(allow) => {
            let mut env = HashMap::new();
            for key in allow {
                if let Some(value) = ambient.get(key) {
                    env.insert(key.clone(), value.clone());
                }
            }
            for (key, value) in ambient {
                if crate::guard::RESERVED_PREFIXES
                    .iter()
                    .any(|p| key.starts_with(p))
                {
                    env.insert(key.clone(), value.clone());
                }
            }
            env
        }
        None => ambient.clone(),
    };
    for (key, value) in injected {
        env.insert(key.clone(), value.clone());
    }
    env
}

pub struct Supervisor {
    client: reqwest::Client,
    base_url: String,
    token: String,
    keys: Vec<String>,
    clean_allow: Option<Vec<String>>,
    interval: Duration,
}

impl Supervisor {
    pub fn new(
        base_url: String,
        token: String,
        keys: Vec<String>,
        clean_allow: Option<Vec<String>>,
        interval_secs: u64,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            keys,
            clean_allow,
            interval: Duration::from_secs(interval_secs.max(1)),
        }
    }

    /// Fetch the current value set from the broker.
    async fn fetch_values(&self) -> Result<HashMap<String, String>, SupervisorError> {
        let mut request = self
            .client
            .get(format!("{}/secrets/env", self.base_url))
            .bearer_auth(&self.token);
        if !self.keys.is_empty() {
            request = request.query(&[("keys", self.keys.join(","))]);
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(SupervisorError::FetchStatus(response.status().as_u16()));
        }
        let payload: EnvValuesResponse = response.json().await?;
        Ok(payload.values)
    }

    /// Run the leak guard over the ambient process environment.
    fn ensure_no_leak(&self, injected: &HashMap<String, String>) -> Result<(), SupervisorError> {
        let ambient: HashMap<String, String> = std::env::vars().collect();
        let violations = crate::guard::scan(&ambient, injected);
        if violations.is_empty() {
            Ok(())
        } else {
            Err(SupervisorError::SecretLeak(violations))
        }
    }

    fn spawn_child(&self, cmd: &[String], injected: &HashMap<String, String>) -> Result<Child, SupervisorError> {
        let ambient: HashMap<String, String> = std::env::vars().collect();
        let env = build_env(&ambient, self.clean_allow.as_deref(), injected);

        Command::new(&cmd[0])
            .args(&cmd[1..])
            .env_clear()
            .envs(&env)
            .spawn()
            .map_err(|e| SupervisorError::Spawn(cmd[0].clone(), e))
    }

    /// One-shot mode: fetch, scan, run the command to completion and return
    /// its exit code.
    pub async fn run_once(&self, cmd: &[String]) -> Result<i32, SupervisorError> {
        let values = self.fetch_values().await?;
        self.ensure_no_leak(&values)?;

        let mut child = self.spawn_child(cmd, &values)?;
        let status = child.wait().await.map_err(SupervisorError::Wait)?;
        Ok(status.code().unwrap_or(0))
    }

    /// Supervised mode: keep the child running, restarting it whenever the
    /// fetched value set drifts. Returns the child's exit code when it exits
    /// on its own (no respawn-on-crash).
    pub async fn run_supervised(&self, cmd: &[String]) -> Result<i32, SupervisorError> {
        let mut values = self.fetch_values().await?;
        self.ensure_no_leak(&values)?;
        let mut current_hash = hash_values(&values);

        let mut child = self.spawn_child(cmd, &values)?;
        info!(command = %cmd.join(" "), "supervising child");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick completes immediately; consume it so the loop waits
        // a full interval before the first re-fetch.
        ticker.tick().await;

        loop {
            tokio::select! {
                status = child.wait() => {
                    // The child exited on its own; propagate its code.
                    let status = status.map_err(SupervisorError::Wait)?;
                    info!(?status, "child exited; shutting down");
                    return Ok(status.code().unwrap_or(0));
                }
                _ = ticker.tick() => {
                    let next = match self.fetch_values().await {
                        Ok(next) => next,
                        Err(e) => {
                            // Fail-safe: keep running on last-known-good
                            // secrets and retry on the next tick.
                            warn!("secret fetch failed: {e}; keeping current environment");
                            continue;
                        }
                    };
                    // The guard gates every rebuild, not only startup.
                    if let Err(e) = self.ensure_no_leak(&next) {
                        stop_child(&mut child).await;
                        return Err(e);
                    }
                    let next_hash = hash_values(&next);
                    if next_hash == current_hash {
                        continue;
                    }
                    info!("secret set changed; restarting child");
                    stop_child(&mut child).await;
                    values = next;
                    current_hash = next_hash;
                    child = self.spawn_child(cmd, &values)?;
                }
            }
        }
    }
}

/// Send SIGTERM and wait for the child to exit, force-killing after a
/// bounded grace period.
async fn stop_child(child: &mut Child) {
    if let Some(pid) = child.id() {
        unsafe {
            libc::kill(pid as i32, libc::SIGTERM);
        }
        if tokio::time::timeout(GRACEFUL_STOP_TIMEOUT, child.wait())
            .await
            .is_ok()
        {
            return;
        }
        warn!("child did not exit after SIGTERM; killing");
    }
    let _ = child.kill().await;
}

// ----------------------------------------------------------------------
// Access-token discovery
// ----------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct AuthProfileStore {
    #[serde(default)]
    profiles: HashMap<String, AuthProfile>,
}

#[derive(Debug, Deserialize)]
struct AuthProfile {
    #[serde(default)]
    provider: String,
    token: Option<String>,
    access: Option<String>,
}

/// Read a clawvault access token out of an OpenClaw `auth-profiles.json`
/// tree: the state-dir file itself plus any per-agent copies.
fn token_from_profiles(state_dir: &Path) -> Option<String> {
    let mut candidates = vec![state_dir.join("auth-profiles.json")];
    let agents_dir = state_dir.join("agents");
    if let Ok(entries) = std::fs::read_dir(&agents_dir) {
        for entry in entries.flatten() {
            if entry.path().is_dir() {
                candidates.push(entry.path().join("agent").join("auth-profiles.json"));
            }
        }
    }

    for candidate in candidates {
        let raw = match std::fs::read_to_string(&candidate) {
            Ok(raw) => raw,
            Err(_) => continue,
        };
        let parsed: AuthProfileStore = match serde_json::from_str(&raw) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(path = %candidate.display(), "ignoring malformed auth profiles: {e}");
                continue;
            }
        };
        for profile in parsed.profiles.values() {
            if profile.provider != "clawvault" {
                continue;
            }
            let token = profile.token.as_deref().or(profile.access.as_deref());
            if let Some(token) = token {
                let token = token.trim();
                if !token.is_empty() {
                    return Some(token.to_string());
                }
            }
        }
    }
    None
}

/// Locate a usable access token: `CLAWVAULT_ACCESS_TOKEN`, then the
/// OpenClaw auth-profiles files.
pub fn discover_access_token() -> Option<String> {
    if let Ok(token) = std::env::var("CLAWVAULT_ACCESS_TOKEN") {
        let token = token.trim();
        if !token.is_empty() {
            return Some(token.to_string());
        }
    }
    token_from_profiles(&crate::openclaw::resolve_state_dir())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_hash_is_order_independent() {
        let a = map(&[("A", "1"), ("B", "2"), ("C", "3")]);
        let mut b = HashMap::new();
        for (k, v) in [("C", "3"), ("A", "1"), ("B", "2")] {
            b.insert(k.to_string(), v.to_string());
        }
        assert_eq!(hash_values(&a), hash_values(&b));
    }

    #[test]
    fn test_hash_detects_drift() {
        let a = map(&[("A", "1")]);
        let b = map(&[("A", "2")]);
        let c = map(&[("B", "1")]);
        assert_ne!(hash_values(&a), hash_values(&b));
        assert_ne!(hash_values(&a), hash_values(&c));
        assert_eq!(hash_values(&a), hash_values(&a.clone()));
    }

    #[test]
    fn test_hash_distinguishes_key_value_split() {
        // "AB"="C" must not collide with "A"="BC".
        let a = map(&[("AB", "C")]);
        let b = map(&[("A", "BC")]);
        assert_ne!(hash_values(&a), hash_values(&b));
    }

    #[test]
    fn test_build_env_full_mode_injected_wins() {
        let ambient = map(&[("PATH", "/usr/bin"), ("EDITOR", "vi"), ("X", "old")]);
        let injected = map(&[("X", "new")]);

        let env = build_env(&ambient, None, &injected);
        assert_eq!(env.get("PATH").unwrap(), "/usr/bin");
        assert_eq!(env.get("EDITOR").unwrap(), "vi");
        assert_eq!(env.get("X").unwrap(), "new");
    }

    #[test]
    fn test_build_env_clean_mode() {
        let ambient = map(&[
            ("PATH", "/usr/bin"),
            ("EDITOR", "vi"),
            ("OPENCLAW_GATEWAY", "1"),
            ("CLAWVAULT_BASE_URL", "http://localhost:8791"),
        ]);
        let injected = map(&[("API_VALUE", "x")]);
        let allow: Vec<String> = DEFAULT_CLEAN_ALLOW.iter().map(|s| s.to_string()).collect();

        let env = build_env(&ambient, Some(&allow), &injected);
        assert_eq!(env.get("PATH").unwrap(), "/usr/bin");
        // Not on the allow-list.
        assert!(!env.contains_key("EDITOR"));
        // Reserved prefixes always pass through.
        assert_eq!(env.get("OPENCLAW_GATEWAY").unwrap(), "1");
        assert_eq!(env.get("CLAWVAULT_BASE_URL").unwrap(), "http://localhost:8791");
        assert_eq!(env.get("API_VALUE").unwrap(), "x");
    }

    #[test]
    fn test_token_from_profiles() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("auth-profiles.json"),
            r#"{"version":1,"profiles":{
                "other": {"type":"oauth","provider":"github","token":"gh-token"},
                "vault": {"type":"token","provider":"clawvault","token":"cv-token"}
            }}"#,
        )
        .unwrap();

        assert_eq!(token_from_profiles(dir.path()).as_deref(), Some("cv-token"));
    }

    #[test]
    fn test_token_from_agent_profiles() {
        let dir = tempfile::tempdir().unwrap();
        let agent_dir = dir.path().join("agents").join("default").join("agent");
        std::fs::create_dir_all(&agent_dir).unwrap();
        std::fs::write(
            agent_dir.join("auth-profiles.json"),
            r#"{"profiles":{"vault":{"provider":"clawvault","access":"agent-token"}}}"#,
        )
        .unwrap();

        assert_eq!(
            token_from_profiles(dir.path()).as_deref(),
            Some("agent-token")
        );
    }

    #[test]
    fn test_token_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(token_from_profiles(dir.path()).is_none());

        std::fs::write(
            dir.path().join("auth-profiles.json"),
            r#"{"profiles":{"gh":{"provider":"github","token":"x"}}}"#,
        )
        .unwrap();
        assert!(token_from_profiles(dir.path()).is_none());
    }

    #[tokio::test]
    async fn test_stop_child_terminates_gracefully() {
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        stop_child(&mut child).await;
        let status = child.wait().await.unwrap();
        assert!(!status.success());
    }

    struct StubVault {
        values: HashMap<String, String>,
        fail: bool,
    }

    async fn stub_env(
        axum::extract::State(stub): axum::extract::State<
            std::sync::Arc<std::sync::Mutex<StubVault>>,
        >,
    ) -> axum::response::Response {
        use axum::response::IntoResponse;
        let stub = stub.lock().unwrap();
        if stub.fail {
            axum::http::StatusCode::INTERNAL_SERVER_ERROR.into_response()
        } else {
            axum::Json(serde_json::json!({ "values": stub.values })).into_response()
        }
    }

    async fn spawn_stub(stub: std::sync::Arc<std::sync::Mutex<StubVault>>) -> String {
        let app = axum::Router::new()
            .route("/secrets/env", axum::routing::get(stub_env))
            .with_state(stub);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn read_pids(path: &Path) -> Vec<i32> {
        std::fs::read_to_string(path)
            .unwrap_or_default()
            .lines()
            .filter_map(|line| line.trim().parse().ok())
            .collect()
    }

    #[tokio::test]
    async fn test_run_supervised_restarts_only_on_drift() {
        let stub = std::sync::Arc::new(std::sync::Mutex::new(StubVault {
            values: map(&[("INJECTED_VALUE", "one")]),
            fail: false,
        }));
        let base_url = spawn_stub(std::sync::Arc::clone(&stub)).await;

        // The child logs its pid on every (re)start; the line count is the
        // number of spawns.
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("pids");
        let cmd = vec![
            "sh".to_string(),
            "-c".to_string(),
            format!("echo $$ >> {}; exec sleep 30", marker.display()),
        ];

        let supervisor = Supervisor::new(base_url, "test-token".into(), Vec::new(), None, 1);
        let handle = tokio::spawn(async move { supervisor.run_supervised(&cmd).await });

        // Several ticks with an unchanged value set: no restart.
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(read_pids(&marker).len(), 1);

        // Drift restarts the child exactly once, with a fresh process.
        stub.lock()
            .unwrap()
            .values
            .insert("INJECTED_VALUE".into(), "two".into());
        tokio::time::sleep(Duration::from_millis(2500)).await;
        let pids = read_pids(&marker);
        assert_eq!(pids.len(), 2);
        assert_ne!(pids[0], pids[1]);

        // A failing fetch keeps the current child running on the
        // last-known-good environment.
        stub.lock().unwrap().fail = true;
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(read_pids(&marker).len(), 2);

        handle.abort();
        unsafe {
            libc::kill(pids[1], libc::SIGKILL);
        }
    }

    #[tokio::test]
    async fn test_fetch_values_encodes_keys_query() {
        // Echo the decoded keys parameter back as a value, so characters
        // that would corrupt a hand-built query string get checked.
        async fn echo(
            axum::extract::Query(query): axum::extract::Query<HashMap<String, String>>,
        ) -> axum::Json<serde_json::Value> {
            axum::Json(serde_json::json!({
                "values": { "keys": query.get("keys").cloned().unwrap_or_default() }
            }))
        }
        let app = axum::Router::new().route("/secrets/env", axum::routing::get(echo));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let supervisor = Supervisor::new(
            format!("http://{addr}"),
            "tok".into(),
            vec!["MY KEY".into(), "OTHER&VALUE".into()],
            None,
            5,
        );
        let values = supervisor.fetch_values().await.unwrap();
        assert_eq!(values.get("keys").unwrap(), "MY KEY,OTHER&VALUE");
    }
}
