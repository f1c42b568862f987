use std::net::SocketAddr;
use std::time::Duration;

use crate::error::RuntimeError;

pub const ENV_ACTIVATION_TIMEOUT_MS: &str = "INBOUND_ACTIVATION_TIMEOUT_MS";
pub const ENV_DEACTIVATION_TIMEOUT_MS: &str = "INBOUND_DEACTIVATION_TIMEOUT_MS";
pub const ENV_ACTIVITY_LOG_SIZE: &str = "INBOUND_ACTIVITY_LOG_SIZE";
pub const ENV_STATUS_REPORT_SECS: &str = "INBOUND_STATUS_REPORT_SECS";
pub const ENV_HTTP_BIND: &str = "INBOUND_HTTP_BIND";

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Upper bound for a single `activate()` call; expiry counts as an activation failure.
    pub activation_timeout: Duration,
    /// Upper bound for a single `deactivate()` call; expiry is logged and ignored.
    pub deactivation_timeout: Duration,
    /// Number of activity entries retained per executable.
    pub activity_log_size: usize,
    /// Period of the status report; `None` disables it.
    pub status_report_interval: Option<Duration>,
    pub http: HttpServerConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            activation_timeout: Duration::from_secs(30),
            deactivation_timeout: Duration::from_secs(30),
            activity_log_size: 10,
            status_report_interval: Some(Duration::from_secs(60 * 60)),
            http: HttpServerConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Build a config from `INBOUND_*` environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, RuntimeError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`RuntimeConfig::from_env`] but reads values through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, RuntimeError> {
        let mut config = Self::default();
        if let Some(ms) = parse_var::<u64>(&lookup, ENV_ACTIVATION_TIMEOUT_MS)? {
            config.activation_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64>(&lookup, ENV_DEACTIVATION_TIMEOUT_MS)? {
            config.deactivation_timeout = Duration::from_millis(ms);
        }
        if let Some(size) = parse_var::<usize>(&lookup, ENV_ACTIVITY_LOG_SIZE)? {
            config.activity_log_size = size;
        }
        if let Some(secs) = parse_var::<u64>(&lookup, ENV_STATUS_REPORT_SECS)? {
            config.status_report_interval = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(bind) = parse_var::<SocketAddr>(&lookup, ENV_HTTP_BIND)? {
            config.http = HttpServerConfig {
                enabled: true,
                bind,
            };
        }
        Ok(config)
    }
}

fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, RuntimeError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|err| RuntimeError::Config(format!("{key}={raw}: {err}"))),
    }
}

/// HTTP status API server settings.
#[derive(Debug, Clone)]
pub struct HttpServerConfig {
    pub enabled: bool,
    pub bind: SocketAddr,
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: SocketAddr::from(([127, 0, 0, 1], 7878)),
        }
    }
}
