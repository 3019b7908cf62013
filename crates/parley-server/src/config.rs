use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

/// Server settings, read from `PARLEY_*` environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub history_default_limit: u32,
    pub history_max_limit: u32,
    pub typing_timeout: Duration,
    pub max_attachment_bytes: usize,
    /// `None` allows any origin.
    pub cors_origin: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let config = Self {
            host: get("PARLEY_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse(&get, "PARLEY_PORT", 5000)?,
            db_path: get("PARLEY_DB_PATH").unwrap_or_else(|| "parley.db".into()).into(),
            history_default_limit: parse(&get, "PARLEY_HISTORY_DEFAULT_LIMIT", 20)?,
            history_max_limit: parse(&get, "PARLEY_HISTORY_MAX_LIMIT", 200)?,
            typing_timeout: Duration::from_secs(parse(&get, "PARLEY_TYPING_TIMEOUT_SECS", 10)?),
            max_attachment_bytes: parse(&get, "PARLEY_MAX_ATTACHMENT_BYTES", 5 * 1024 * 1024)?,
            cors_origin: get("PARLEY_CORS_ORIGIN").filter(|origin| !origin.trim().is_empty()),
        };

        anyhow::ensure!(
            config.history_default_limit > 0 && config.history_default_limit <= config.history_max_limit,
            "PARLEY_HISTORY_DEFAULT_LIMIT must be between 1 and PARLEY_HISTORY_MAX_LIMIT ({})",
            config.history_max_limit
        );
        anyhow::ensure!(!config.typing_timeout.is_zero(), "PARLEY_TYPING_TIMEOUT_SECS must be positive");

        Ok(config)
    }

    pub fn addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }
}

fn parse<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match get(key) {
        Some(raw) => raw.trim().parse().with_context(|| format!("{key} is not a valid number: {raw:?}")),
        None => Ok(default),
    }
}
