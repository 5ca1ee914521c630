//! OpenClaw gateway config management.
//!
//! The broker reads and rewrites the allowed-models map inside the
//! gateway's `openclaw.json` under the OpenClaw state directory. Writes go
//! through a temp file and rename so a crash never leaves a half-written
//! config behind.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::{json, Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OpenclawError {
    #[error("failed to access openclaw config: {0}")]
    Io(#[from] std::io::Error),

    #[error("openclaw config is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// How a requested model list combines with the existing allow-list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateMode {
    Merge,
    Replace,
}

#[derive(Debug)]
pub struct ConfigFile {
    pub path: PathBuf,
    pub exists: bool,
    pub config: Value,
}

/// Expand a leading `~/` against the home directory. Only a leading tilde
/// is a shortcut; `~/` anywhere else in the path is literal.
fn expand_tilde(dir: &str, home: &str) -> PathBuf {
    match dir.strip_prefix("~/") {
        Some(rest) => Path::new(home).join(rest),
        None => PathBuf::from(dir),
    }
}

/// The OpenClaw state directory: `OPENCLAW_STATE_DIR` when set, otherwise
/// `~/.openclaw`.
pub fn resolve_state_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/root".to_string());
    if let Ok(dir) = std::env::var("OPENCLAW_STATE_DIR") {
        let dir = dir.trim();
        if !dir.is_empty() {
            return expand_tilde(dir, &home);
        }
    }
    Path::new(&home).join(".openclaw")
}

pub fn config_path() -> PathBuf {
    resolve_state_dir().join("openclaw.json")
}

/// Read the config file. A missing file is an empty config, not an error;
/// a present but malformed file is.
pub fn read_config(path: &Path) -> Result<ConfigFile, OpenclawError> {
    if !path.exists() {
        return Ok(ConfigFile {
            path: path.to_path_buf(),
            exists: false,
            config: json!({}),
        });
    }
    let raw = std::fs::read_to_string(path)?;
    let config: Value = serde_json::from_str(&raw)?;
    Ok(ConfigFile {
        path: path.to_path_buf(),
        exists: true,
        config,
    })
}

/// Model ids currently allowed: the keys of `agents.defaults.models`.
pub fn allowed_models(config: &Value) -> Vec<String> {
    config
        .pointer("/agents/defaults/models")
        .and_then(Value::as_object)
        .map(|models| models.keys().cloned().collect())
        .unwrap_or_default()
}

/// Trim, drop blanks and dedup while preserving first-seen order.
fn normalize(models: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    models
        .into_iter()
        .map(|m| m.trim().to_string())
        .filter(|m| !m.is_empty())
        .filter(|m| seen.insert(m.clone()))
        .collect()
}

/// Rewrite `agents.defaults.models` and return the resulting allow-list.
///
/// Merge keeps existing entries and appends new ones; replace swaps the
/// map wholesale. A legacy top-level `models.allowed` key is removed when
/// present. The rest of the config survives untouched.
pub fn update_allowed_models(
    path: &Path,
    models: &[String],
    mode: UpdateMode,
) -> Result<Vec<String>, OpenclawError> {
    let mut file = read_config(path)?;
    let requested = normalize(models.iter().cloned());
    let next = match mode {
        UpdateMode::Replace => requested,
        UpdateMode::Merge => {
            let existing = normalize(allowed_models(&file.config));
            normalize(existing.into_iter().chain(requested))
        }
    };

    let mut model_map = Map::new();
    for model in &next {
        model_map.insert(model.clone(), json!({}));
    }

    if !file.config.is_object() {
        file.config = Value::Object(Map::new());
    }
    if let Some(legacy) = file
        .config
        .pointer_mut("/models")
        .and_then(Value::as_object_mut)
    {
        legacy.remove("allowed");
    }
    if file.config.pointer("/agents").map_or(true, |v| !v.is_object()) {
        file.config["agents"] = json!({});
    }
    if file
        .config
        .pointer("/agents/defaults")
        .map_or(true, |v| !v.is_object())
    {
        file.config["agents"]["defaults"] = json!({});
    }
    file.config["agents"]["defaults"]["models"] = Value::Object(model_map);

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.clawvault.tmp");
    std::fs::write(&tmp, serde_json::to_vec_pretty(&file.config)?)?;
    std::fs::rename(&tmp, path)?;
    Ok(next)
}
