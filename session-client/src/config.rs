use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

pub const DEFAULT_BASE_URL: &str = "http://localhost:8001/api/v1";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_REFRESH_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// API root without a trailing slash.
    pub base_url: String,
    pub request_timeout: Duration,
    pub refresh_timeout: Duration,
    /// Durable session file; `None` keeps the session in memory.
    pub store_path: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            refresh_timeout: Duration::from_secs(DEFAULT_REFRESH_TIMEOUT_SECS),
            store_path: None,
        }
    }
}

impl ClientConfig {
    pub fn with_base_url(mut self, base_url: impl AsRef<str>) -> Self {
        self.base_url = normalize_base_url(base_url.as_ref());
        self
    }

    pub fn with_refresh_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_timeout = timeout;
        self
    }

    pub fn with_store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_path = Some(path.into());
        self
    }

    /// Builds the config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| lookup(key).and_then(|value| normalize_optional(&value));

        let base_url = read("REPOSITORIO_API_URL")
            .map(|value| normalize_base_url(&value))
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(anyhow!(
                "REPOSITORIO_API_URL must be an http(s) URL, got '{base_url}'"
            ));
        }

        let request_timeout = read("SESSION_REQUEST_TIMEOUT_SECS")
            .map(|value| parse_secs(&value))
            .transpose()
            .context("Failed to parse SESSION_REQUEST_TIMEOUT_SECS")?
            .unwrap_or(Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS));

        let refresh_timeout = read("SESSION_REFRESH_TIMEOUT_SECS")
            .map(|value| parse_secs(&value))
            .transpose()
            .context("Failed to parse SESSION_REFRESH_TIMEOUT_SECS")?
            .unwrap_or(Duration::from_secs(DEFAULT_REFRESH_TIMEOUT_SECS));

        let store_path = read("SESSION_STORE_PATH").map(PathBuf::from);

        Ok(Self {
            base_url,
            request_timeout,
            refresh_timeout,
            store_path,
        })
    }
}

pub fn load_client_config() -> Result<ClientConfig> {
    ClientConfig::from_lookup(|key| env::var(key).ok())
}

fn normalize_optional(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn normalize_base_url(value: &str) -> String {
    value.trim().trim_end_matches('/').to_string()
}

fn parse_secs(value: &str) -> Result<Duration> {
    let secs: u64 = value
        .parse()
        .map_err(|err| anyhow!("Invalid number of seconds '{value}': {err}"))?;
    if secs == 0 {
        return Err(anyhow!("Timeout must be at least one second"));
    }
    Ok(Duration::from_secs(secs))
}
