#![forbid(unsafe_code)]

use anyhow::{Context, Result, anyhow};
use std::{
    collections::HashMap,
    env, fs,
    net::IpAddr,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::poller::PollOptions;
use crate::provider::ProviderKind;

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_TUNEGRAB_PORT: u16 = 8000;
pub const DEFAULT_TUNEGRAB_HOST: &str = "127.0.0.1";
pub const DEFAULT_DOWNLOADERIZE_BASE: &str = "https://spotify.downloaderize.com/";
pub const DEFAULT_FABDL_BASE: &str = "https://api.fabdl.com";
pub const DEFAULT_POLL_INTERVAL_SECS: f64 = 2.0;
pub const DEFAULT_TIMEOUT_SECS: f64 = 120.0;

#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub host: IpAddr,
    pub port: u16,
    pub provider: ProviderKind,
    pub downloaderize_base: String,
    pub fabdl_base: String,
    pub poll_interval: Duration,
    pub timeout: Duration,
    pub debug: bool,
}

impl RuntimeSettings {
    /// Base URL of whichever upstream is selected.
    pub fn provider_base(&self) -> &str {
        match self.provider {
            ProviderKind::Downloaderize => &self.downloaderize_base,
            ProviderKind::Fabdl => &self.fabdl_base,
        }
    }

    pub fn poll_options(&self) -> PollOptions {
        PollOptions {
            interval: self.poll_interval,
            timeout: self.timeout,
            max_attempts: None,
        }
    }
}

pub fn load_runtime_settings() -> Result<RuntimeSettings> {
    resolve_runtime_settings(RuntimeOverrides::default())
}

#[derive(Debug, Clone, Default)]
pub struct RuntimeOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub provider: Option<ProviderKind>,
    /// Replaces the base URL of the selected provider only.
    pub base_url: Option<String>,
    pub poll_interval: Option<f64>,
    pub timeout: Option<f64>,
    pub debug: Option<bool>,
    pub env_path: Option<PathBuf>,
}

pub fn resolve_runtime_settings(overrides: RuntimeOverrides) -> Result<RuntimeSettings> {
    let env_path = overrides
        .env_path
        .as_deref()
        .unwrap_or_else(|| Path::new(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(env_path)?;
    build_runtime_settings_with_overrides(&file_vars, env_var_string, overrides)
}

#[cfg(test)]
fn build_runtime_settings(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> Result<RuntimeSettings> {
    build_runtime_settings_with_overrides(file_vars, env_lookup, RuntimeOverrides::default())
}

fn build_runtime_settings_with_overrides(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: RuntimeOverrides,
) -> Result<RuntimeSettings> {
    let host_raw = overrides
        .host
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .or_else(|| lookup_value("TUNEGRAB_HOST", file_vars, &env_lookup))
        .unwrap_or_else(|| DEFAULT_TUNEGRAB_HOST.to_string());
    let host = host_raw
        .parse::<IpAddr>()
        .with_context(|| format!("expected a valid IPv4 or IPv6 address, got {host_raw:?}"))?;
    let port = overrides
        .port
        .or_else(|| {
            lookup_value("TUNEGRAB_PORT", file_vars, &env_lookup)
                .and_then(|value| value.parse::<u16>().ok())
        })
        .unwrap_or(DEFAULT_TUNEGRAB_PORT);
    let provider = match overrides.provider {
        Some(provider) => provider,
        None => match lookup_value("TUNEGRAB_PROVIDER", file_vars, &env_lookup) {
            Some(raw) => raw
                .parse::<ProviderKind>()
                .map_err(|err| anyhow!("TUNEGRAB_PROVIDER: {err}"))?,
            None => ProviderKind::default(),
        },
    };
    let mut downloaderize_base = lookup_value("TUNEGRAB_DOWNLOADERIZE_BASE", file_vars, &env_lookup)
        .unwrap_or_else(|| DEFAULT_DOWNLOADERIZE_BASE.to_string());
    let mut fabdl_base = lookup_value("TUNEGRAB_FABDL_BASE", file_vars, &env_lookup)
        .unwrap_or_else(|| DEFAULT_FABDL_BASE.to_string());
    if let Some(base) = overrides
        .base_url
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
    {
        match provider {
            ProviderKind::Downloaderize => downloaderize_base = base,
            ProviderKind::Fabdl => fabdl_base = base,
        }
    }
    let poll_interval = seconds_setting(
        overrides.poll_interval,
        "TUNEGRAB_POLL_INTERVAL",
        DEFAULT_POLL_INTERVAL_SECS,
        file_vars,
        &env_lookup,
    );
    let timeout = seconds_setting(
        overrides.timeout,
        "TUNEGRAB_TIMEOUT",
        DEFAULT_TIMEOUT_SECS,
        file_vars,
        &env_lookup,
    );
    let debug = overrides
        .debug
        .filter(|enabled| *enabled)
        .or_else(|| lookup_value("TUNEGRAB_DEBUG", file_vars, &env_lookup).map(|v| is_truthy(&v)))
        .unwrap_or(false);

    Ok(RuntimeSettings {
        host,
        port,
        provider,
        downloaderize_base,
        fabdl_base,
        poll_interval,
        timeout,
        debug,
    })
}

fn seconds_setting(
    override_value: Option<f64>,
    key: &str,
    default: f64,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Duration {
    override_value
        .or_else(|| lookup_value(key, file_vars, env_lookup).and_then(|v| v.parse::<f64>().ok()))
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
        .unwrap_or_else(|| Duration::from_secs_f64(default))
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key)
        .or_else(|| file_vars.get(key).cloned())
        .filter(|value| !value.trim().is_empty())
}

pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value_raw.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|value| value.strip_suffix('"'))
            .or_else(|| {
                value
                    .strip_prefix('\'')
                    .and_then(|value| value.strip_suffix('\''))
            })
            .unwrap_or(value);
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}
