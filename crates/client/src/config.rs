//! Sync engine configuration from environment variables.

use std::time::Duration;

use kelmah_shared::Handshake;
use thiserror::Error;
use url::Url;

use crate::ws::ReconnectConfig;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("environment variable {0} is not set")]
    MissingVar(&'static str),
    #[error("{var} is not a valid URL: {source}")]
    InvalidUrl {
        var: &'static str,
        #[source]
        source: url::ParseError,
    },
    #[error("unsupported URL scheme `{0}` (expected ws, wss, http or https)")]
    UnsupportedScheme(String),
    #[error("{var}=`{value}` is not a valid number")]
    InvalidNumber { var: &'static str, value: String },
}

/// Settings for one real-time session.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// WebSocket endpoint; the handshake query is appended to it.
    pub ws_url: Url,
    pub reconnect: ReconnectConfig,
    /// Ping interval while connected. `None` disables the heartbeat.
    pub heartbeat_interval: Option<Duration>,
    /// How long an open may take before it counts as a failed attempt.
    pub handshake_timeout: Duration,
}

impl SyncConfig {
    /// Build a config with the default timings for `ws_url`.
    ///
    /// `http(s)` URLs are rewritten to `ws(s)`.
    pub fn new(ws_url: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            ws_url: parse_ws_url("ws_url", ws_url)?,
            reconnect: ReconnectConfig::default(),
            heartbeat_interval: Some(Duration::from_secs(30)),
            handshake_timeout: Duration::from_secs(20),
        })
    }

    /// Load configuration from the process environment.
    ///
    /// Environment variables:
    /// - `KELMAH_WS_URL`: WebSocket endpoint (required)
    /// - `KELMAH_RECONNECT_ATTEMPTS`: retry ceiling (default: 3)
    /// - `KELMAH_RECONNECT_DELAY_MS`: first retry delay (default: 2000)
    /// - `KELMAH_RECONNECT_DELAY_MAX_MS`: retry delay cap (default: 5000)
    /// - `KELMAH_HEARTBEAT_SECS`: ping interval, 0 disables (default: 30)
    /// - `KELMAH_HANDSHAKE_TIMEOUT_SECS`: open timeout (default: 20)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let url = get("KELMAH_WS_URL").ok_or(ConfigError::MissingVar("KELMAH_WS_URL"))?;
        let mut config = Self::new(&url).map_err(|e| match e {
            ConfigError::InvalidUrl { source, .. } => ConfigError::InvalidUrl {
                var: "KELMAH_WS_URL",
                source,
            },
            other => other,
        })?;

        if let Some(v) = number::<u32>(&get, "KELMAH_RECONNECT_ATTEMPTS")? {
            config.reconnect.max_attempts = v;
        }
        if let Some(v) = number::<u32>(&get, "KELMAH_RECONNECT_DELAY_MS")? {
            config.reconnect.initial_delay_ms = v;
        }
        if let Some(v) = number::<u32>(&get, "KELMAH_RECONNECT_DELAY_MAX_MS")? {
            config.reconnect.max_delay_ms = v;
        }
        if let Some(v) = number::<u64>(&get, "KELMAH_HEARTBEAT_SECS")? {
            config.heartbeat_interval = (v > 0).then(|| Duration::from_secs(v));
        }
        if let Some(v) = number::<u64>(&get, "KELMAH_HANDSHAKE_TIMEOUT_SECS")? {
            config.handshake_timeout = Duration::from_secs(v);
        }
        Ok(config)
    }

    /// The URL to open for `handshake`, keeping any query already configured.
    pub fn handshake_url(&self, handshake: &Handshake) -> String {
        let mut url = self.ws_url.clone();
        let query = match url.query() {
            Some(existing) if !existing.is_empty() => {
                format!("{}&{}", existing, handshake.to_query_string())
            }
            _ => handshake.to_query_string(),
        };
        url.set_query(Some(&query));
        url.to_string()
    }
}

fn parse_ws_url(var: &'static str, raw: &str) -> Result<Url, ConfigError> {
    let mut url = Url::parse(raw.trim()).map_err(|source| ConfigError::InvalidUrl { var, source })?;
    let scheme = match url.scheme() {
        "ws" | "wss" => return Ok(url),
        "http" => "ws",
        "https" => "wss",
        other => return Err(ConfigError::UnsupportedScheme(other.to_string())),
    };
    url.set_scheme(scheme)
        .map_err(|_| ConfigError::UnsupportedScheme(url.scheme().to_string()))?;
    Ok(url)
}

fn number<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    match get(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidNumber { var, value }),
    }
}
