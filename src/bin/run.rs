//! clawvault-run - environment-injection launcher.
//!
//! Runs a command with vault-fetched values injected into its environment.
//! `env` runs once and propagates the child's exit code; `gateway` keeps a
//! long-lived child running and restarts it when the secret set changes.
//!
//! Exit codes: 2 = direct secrets detected in the ambient environment,
//! 1 = no usable access token (or another launcher failure), otherwise the
//! child's own exit code.

use clawvault::supervisor::{
    discover_access_token, Supervisor, SupervisorError, DEFAULT_CLEAN_ALLOW,
    DEFAULT_INTERVAL_SECS,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn usage() {
    eprintln!(
        r#"Usage:
  clawvault-run env [--keys KEY1,KEY2] [--clean-env [--allow PATH,HOME]] -- <command>
  clawvault-run gateway [--keys KEY1,KEY2] [--interval 5] [--clean-env] [--] openclaw gateway run

Environment:
  CLAWVAULT_BASE_URL (default http://localhost:8791)
  CLAWVAULT_ACCESS_TOKEN (optional, otherwise reads OpenClaw auth-profiles.json)
"#
    );
}

/// Remove `--keys A,B` from `argv`, returning the parsed key list.
fn parse_keys(argv: &mut Vec<String>) -> Vec<String> {
    match argv.iter().position(|a| a == "--keys") {
        Some(idx) => {
            let raw = argv.get(idx + 1).cloned().unwrap_or_default();
            argv.drain(idx..(idx + 2).min(argv.len()));
            raw.split(',')
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .collect()
        }
        None => Vec::new(),
    }
}

/// Remove `--interval N` from `argv`, returning the cadence in seconds.
fn parse_interval(argv: &mut Vec<String>) -> u64 {
    match argv.iter().position(|a| a == "--interval") {
        Some(idx) => {
            let raw = argv.get(idx + 1).cloned().unwrap_or_default();
            argv.drain(idx..(idx + 2).min(argv.len()));
            match raw.parse::<u64>() {
                Ok(val) if val > 0 => val,
                _ => DEFAULT_INTERVAL_SECS,
            }
        }
        None => DEFAULT_INTERVAL_SECS,
    }
}

/// Remove `--clean-env` (and its optional `--allow A,B`) from `argv`.
/// Returns the allow-list when clean mode is enabled.
fn parse_clean_env(argv: &mut Vec<String>) -> Option<Vec<String>> {
    let idx = argv.iter().position(|a| a == "--clean-env")?;
    argv.remove(idx);

    let allow = match argv.iter().position(|a| a == "--allow") {
        Some(allow_idx) => {
            let raw = argv.get(allow_idx + 1).cloned().unwrap_or_default();
            argv.drain(allow_idx..(allow_idx + 2).min(argv.len()));
            raw.split(',')
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .collect::<Vec<_>>()
        }
        None => Vec::new(),
    };
    if allow.is_empty() {
        Some(DEFAULT_CLEAN_ALLOW.iter().map(|s| s.to_string()).collect())
    } else {
        Some(allow)
    }
}

/// Split off the command after `--`; without a separator the remaining
/// arguments are the command.
fn split_command(argv: Vec<String>) -> Vec<String> {
    match argv.iter().position(|a| a == "--") {
        Some(idx) => argv[idx + 1..].to_vec(),
        None => argv,
    }
}

fn base_url() -> String {
    std::env::var("CLAWVAULT_BASE_URL")
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "http://localhost:8791".to_string())
}

fn exit_code_for(err: &SupervisorError) -> i32 {
    match err {
        SupervisorError::SecretLeak(_) => 2,
        _ => 1,
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "clawvault=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() {
        usage();
        std::process::exit(1);
    }
    let command = args.remove(0);
    let supervised = match command.as_str() {
        "env" => false,
        "gateway" => true,
        _ => {
            usage();
            std::process::exit(1);
        }
    };

    let keys = parse_keys(&mut args);
    let interval = parse_interval(&mut args);
    let clean_allow = parse_clean_env(&mut args);
    let mut cmd = split_command(args);

    if cmd.is_empty() {
        if supervised {
            cmd = vec!["openclaw".into(), "gateway".into(), "run".into()];
        } else {
            usage();
            std::process::exit(1);
        }
    }

    let token = match discover_access_token() {
        Some(token) => token,
        None => {
            eprintln!(
                "No clawvault access token found. Run: openclaw models auth login --provider clawvault"
            );
            std::process::exit(1);
        }
    };

    let supervisor = Supervisor::new(base_url(), token, keys, clean_allow, interval);
    let result = if supervised {
        supervisor.run_supervised(&cmd).await
    } else {
        supervisor.run_once(&cmd).await
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(exit_code_for(&err));
        }
    }
}
