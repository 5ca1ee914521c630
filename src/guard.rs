//! Secret-leak guard.
//!
//! Classifies ambient environment variable names that look like credential
//! material. A secret typed straight into the shell defeats the vault, so
//! the launcher refuses to run when one is present and not vault-injected.

use std::collections::HashMap;

/// Process-namespace prefixes owned by this system and its gateway; names
/// under these prefixes are configuration, never flagged.
pub const RESERVED_PREFIXES: [&str; 2] = ["OPENCLAW_", "CLAWVAULT_"];

const SECRET_NAME_SUFFIXES: [&str; 8] = [
    "_API_KEY",
    "_TOKEN",
    "_SECRET",
    "_PASSWORD",
    "_WEBHOOK",
    "_ACCESS_KEY",
    "_PRIVATE_KEY",
    "_CLIENT_SECRET",
];

const SECRET_NAME_EXACT: [&str; 23] = [
    "OPENAI_API_KEY",
    "ANTHROPIC_API_KEY",
    "OPENROUTER_API_KEY",
    "BRAVE_API_KEY",
    "PERPLEXITY_API_KEY",
    "TELEGRAM_BOT_TOKEN",
    "SLACK_BOT_TOKEN",
    "SLACK_APP_TOKEN",
    "SLACK_SIGNING_SECRET",
    "DISCORD_BOT_TOKEN",
    "TWILIO_ACCOUNT_SID",
    "TWILIO_AUTH_TOKEN",
    "TELNYX_API_KEY",
    "PLIVO_AUTH_ID",
    "PLIVO_AUTH_TOKEN",
    "GMAIL_CLIENT_ID",
    "GMAIL_CLIENT_SECRET",
    "GMAIL_REFRESH_TOKEN",
    "MSTEAMS_APP_ID",
    "MSTEAMS_APP_PASSWORD",
    "MSTEAMS_TENANT_ID",
    "SIGNAL_PHONE_NUMBER",
    "SIGNAL_CLI_PATH",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Not secret-shaped, or under a reserved prefix.
    Exempt,
    /// Looks like credential material that belongs in the vault.
    Secret,
}

/// Classify a single environment variable name.
pub fn classify(name: &str) -> Classification {
    if RESERVED_PREFIXES.iter().any(|p| name.starts_with(p)) {
        return Classification::Exempt;
    }
    if SECRET_NAME_EXACT.contains(&name) {
        return Classification::Secret;
    }
    let upper = name.to_uppercase();
    if SECRET_NAME_SUFFIXES.iter().any(|s| upper.ends_with(s)) {
        return Classification::Secret;
    }
    Classification::Exempt
}

/// Find ambient variables that should have been stored in the vault.
///
/// A name violates when it classifies as secret, carries a non-blank value,
/// and is not among the keys the vault is about to inject anyway.
pub fn scan(
    ambient: &HashMap<String, String>,
    injected: &HashMap<String, String>,
) -> Vec<String> {
    let mut violations: Vec<String> = ambient
        .iter()
        .filter(|(name, value)| {
            !value.trim().is_empty()
                && !injected.contains_key(name.as_str())
                && classify(name) == Classification::Secret
        })
        .map(|(name, _)| name.clone())
        .collect();
    violations.sort();
    violations
}
