use std::str::FromStr;
use std::time::Duration;

use crate::constants::{
    DEFAULT_BASE_URL, DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_HTTP_TIMEOUT_SECS,
    DEFAULT_READY_TIMEOUT_SECS, DEFAULT_RECONNECT_DELAY_MS, DEFAULT_USER_AGENT,
    DEFAULT_VERDICT_TIMEOUT_SECS, DEFAULT_WS_URL,
};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub ws_url: String,
    pub user_agent: String,
    pub http_timeout: Duration,
    pub connect_timeout: Duration,
    /// How long a placement or subscription change waits for the socket to
    /// become ready.
    pub ready_timeout: Duration,
    pub verdict_timeout: Duration,
    pub reconnect_delay: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            ws_url: DEFAULT_WS_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            ready_timeout: Duration::from_secs(DEFAULT_READY_TIMEOUT_SECS),
            verdict_timeout: Duration::from_secs(DEFAULT_VERDICT_TIMEOUT_SECS),
            reconnect_delay: Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS),
        }
    }
}

impl ClientConfig {
    /// Defaults overridden by `PIXELPLANET_*` environment variables. Values
    /// that fail to parse or are not positive keep their default.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let secs = |key: &str, default: Duration| {
            positive::<u64>(lookup(key))
                .map(Duration::from_secs)
                .unwrap_or(default)
        };

        let base_url = lookup("PIXELPLANET_BASE_URL")
            .map(|value| value.trim().trim_end_matches('/').to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or(defaults.base_url);
        let ws_url = lookup("PIXELPLANET_WS_URL")
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or(defaults.ws_url);
        let user_agent = lookup("PIXELPLANET_USER_AGENT")
            .filter(|value| !value.trim().is_empty())
            .unwrap_or(defaults.user_agent);

        Self {
            base_url,
            ws_url,
            user_agent,
            http_timeout: secs("PIXELPLANET_HTTP_TIMEOUT_SECS", defaults.http_timeout),
            connect_timeout: secs("PIXELPLANET_CONNECT_TIMEOUT_SECS", defaults.connect_timeout),
            ready_timeout: secs("PIXELPLANET_READY_TIMEOUT_SECS", defaults.ready_timeout),
            verdict_timeout: secs("PIXELPLANET_VERDICT_TIMEOUT_SECS", defaults.verdict_timeout),
            reconnect_delay: positive::<u64>(lookup("PIXELPLANET_RECONNECT_DELAY_MS"))
                .map(Duration::from_millis)
                .unwrap_or(defaults.reconnect_delay),
        }
    }
}

fn positive<T>(value: Option<String>) -> Option<T>
where
    T: FromStr + PartialOrd + Default,
{
    value
        .and_then(|value| value.trim().parse::<T>().ok())
        .filter(|value| *value > T::default())
}
