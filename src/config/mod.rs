//! Runtime configuration, loaded once per invocation.
//!
//! Environment variables win over the policy file's `api:` section, which wins
//! over built-in defaults. `Settings::from_env_map` takes the environment as a
//! plain map so nothing below `main` reads process state.

use crate::policy::defaults::POLICY_FILE_NAME;
use crate::policy::parser::parse_policy_file;
use crate::policy::types::{ApiSection, Policy};
use crate::utils::paths::find_upwards;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_APPROVAL_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;
pub const DEFAULT_HTTP_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Path of the real git binary; read before anything else, outside `Settings`.
pub const REAL_GIT_ENV: &str = "SAFERUN_REAL_GIT";

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub api_url: Option<String>,
    pub api_key: Option<String>,
    pub webhook_url: Option<String>,
    /// A human can answer prompts
    pub interactive: bool,
    pub approval_timeout: Duration,
    pub poll_interval: Duration,
    /// Per-request timeout, separate from the approval wait
    pub http_timeout: Duration,
    pub max_retries: u32,
    /// `~/.saferun` unless `SAFERUN_HOME` is set
    pub saferun_home: PathBuf,
    /// Also append metrics to `metrics.jsonl`
    pub metrics_file: bool,
}

impl Settings {
    /// Build settings from an environment map.
    ///
    /// `home_dir` is the user's home directory, `tty` whether stdin and stderr
    /// are terminals.
    pub fn from_env_map(
        env: &HashMap<String, String>,
        api: &ApiSection,
        home_dir: Option<&Path>,
        tty: bool,
    ) -> Result<Settings> {
        let get = |key: &str| {
            env.get(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let saferun_home = match get("SAFERUN_HOME") {
            Some(home) => PathBuf::from(home),
            None => home_dir
                .map(|h| h.join(".saferun"))
                .context("Could not determine home directory (set SAFERUN_HOME)")?,
        };

        let non_interactive = get("SAFERUN_NONINTERACTIVE").is_some_and(|v| truthy(&v))
            || get("CI").is_some_and(|v| truthy(&v));

        Ok(Settings {
            api_url: get("SAFERUN_API_URL").or_else(|| api.url.clone()),
            api_key: get("SAFERUN_API_KEY"),
            webhook_url: get("SAFERUN_WEBHOOK_URL").or_else(|| api.webhook_url.clone()),
            interactive: tty && !non_interactive,
            approval_timeout: Duration::from_secs(number(
                get("SAFERUN_APPROVAL_TIMEOUT_SECS"),
                "SAFERUN_APPROVAL_TIMEOUT_SECS",
                api.approval_timeout_secs,
                DEFAULT_APPROVAL_TIMEOUT_SECS,
            )?),
            poll_interval: Duration::from_millis(number(
                get("SAFERUN_POLL_INTERVAL_MS"),
                "SAFERUN_POLL_INTERVAL_MS",
                api.poll_interval_ms,
                DEFAULT_POLL_INTERVAL_MS,
            )?),
            http_timeout: Duration::from_millis(number(
                get("SAFERUN_HTTP_TIMEOUT_MS"),
                "SAFERUN_HTTP_TIMEOUT_MS",
                api.timeout_ms,
                DEFAULT_HTTP_TIMEOUT_MS,
            )?),
            max_retries: number(
                get("SAFERUN_MAX_RETRIES"),
                "SAFERUN_MAX_RETRIES",
                api.max_retries,
                DEFAULT_MAX_RETRIES,
            )?,
            saferun_home,
            metrics_file: get("SAFERUN_METRICS_FILE").is_some_and(|v| truthy(&v)),
        })
    }

    /// Build settings from the real process environment.
    pub fn load(api: &ApiSection) -> Result<Settings> {
        use std::io::IsTerminal;
        let env: HashMap<String, String> = std::env::vars().collect();
        let tty = std::io::stdin().is_terminal() && std::io::stderr().is_terminal();
        Self::from_env_map(&env, api, dirs::home_dir().as_deref(), tty)
    }

    pub fn bypass_file(&self) -> PathBuf {
        self.saferun_home.join("bypass.json")
    }
}

fn truthy(value: &str) -> bool {
    matches!(
        value.to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn number<T>(env_value: Option<String>, key: &str, file_value: Option<T>, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env_value {
        Some(raw) => raw
            .parse::<T>()
            .with_context(|| format!("{} must be a non-negative integer, got '{}'", key, raw)),
        None => Ok(file_value.unwrap_or(default)),
    }
}

/// Find and parse `.saferun.yaml` walking up from `start`.
/// Without a policy file the built-in defaults apply.
pub fn load_policy(start: &Path) -> Result<(Policy, Option<PathBuf>)> {
    match find_upwards(start, POLICY_FILE_NAME) {
        Some(path) => {
            let policy = parse_policy_file(&path)?;
            tracing::debug!("loaded policy from {}", path.display());
            Ok((policy, Some(path)))
        }
        None => {
            tracing::debug!("no {} found, using defaults", POLICY_FILE_NAME);
            Ok((Policy::default(), None))
        }
    }
}
