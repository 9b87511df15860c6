//! Client configuration from environment variables.

use std::time::Duration;

use url::Url;

use crate::error::{ClientError, ClientResult};
use crate::stores::DEFAULT_TYPING_TTL;
use crate::ws::{BackoffPolicy, ReconnectConfig};

const DEFAULT_WS_URL: &str = "ws://localhost:8080/";
const DEFAULT_API_URL: &str = "http://localhost:8080/";
const DEFAULT_HISTORY_LIMIT: u32 = 50;

/// Everything the binary needs to reach a Haven deployment.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base of the real-time endpoints, e.g. `wss://haven.example/`.
    pub ws_url: Url,
    /// Base of the history endpoints, e.g. `https://haven.example/`.
    pub api_url: Url,
    /// Bearer token used when no session store is wired in.
    pub token: Option<String>,
    /// Local participant id, used to recognise our own frames.
    pub user_id: Option<String>,
    pub history_limit: u32,
    pub reconnect: ReconnectConfig,
    /// How long a remote typing indicator lives without a refresh.
    pub typing_ttl: Duration,
}

impl ClientConfig {
    /// Parse configuration from environment variables.
    ///
    /// Environment variables:
    /// - `HAVEN_WS_URL`: real-time base URL (default: "ws://localhost:8080/")
    /// - `HAVEN_API_URL`: history base URL (default: "http://localhost:8080/")
    /// - `HAVEN_TOKEN`: bearer token (default: none)
    /// - `HAVEN_USER_ID`: local participant id (default: none)
    /// - `HAVEN_MAX_RECONNECT_ATTEMPTS`: reconnect ceiling (default: 10)
    /// - `HAVEN_KEEPALIVE_SECS`: keepalive interval in seconds (default: 30)
    /// - `HAVEN_BACKOFF_BASE_MS` / `HAVEN_BACKOFF_CAP_MS`: backoff bounds (default: 3000 / 30000)
    /// - `HAVEN_HISTORY_LIMIT`: messages fetched on (re)connect (default: 50)
    /// - `HAVEN_TYPING_TTL_MS`: typing indicator lifetime (default: 3000)
    pub fn from_env() -> ClientResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ClientConfig::from_env`] but reads values through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> ClientResult<Self> {
        let ws_url = parse_base_url(
            &lookup("HAVEN_WS_URL").unwrap_or_else(|| DEFAULT_WS_URL.to_string()),
        )?;
        if !matches!(ws_url.scheme(), "ws" | "wss") {
            return Err(ClientError::InvalidConfig(format!(
                "HAVEN_WS_URL must use ws:// or wss://, got {}",
                ws_url.scheme()
            )));
        }
        let api_url = parse_base_url(
            &lookup("HAVEN_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string()),
        )?;

        let defaults = ReconnectConfig::default();
        let backoff = BackoffPolicy::new(
            parse_or(&lookup, "HAVEN_BACKOFF_BASE_MS", defaults.backoff.base)?,
            parse_or(&lookup, "HAVEN_BACKOFF_CAP_MS", defaults.backoff.cap)?,
        );
        let keepalive_interval = match lookup("HAVEN_KEEPALIVE_SECS") {
            Some(raw) => Duration::from_secs(parse_number(&raw, "HAVEN_KEEPALIVE_SECS")?),
            None => defaults.keepalive_interval,
        };
        let reconnect = ReconnectConfig {
            backoff,
            max_attempts: match lookup("HAVEN_MAX_RECONNECT_ATTEMPTS") {
                Some(raw) => parse_number(&raw, "HAVEN_MAX_RECONNECT_ATTEMPTS")?,
                None => defaults.max_attempts,
            },
            keepalive_interval,
            ..defaults
        };
        reconnect.validate()?;

        let history_limit = match lookup("HAVEN_HISTORY_LIMIT") {
            Some(raw) => parse_number(&raw, "HAVEN_HISTORY_LIMIT")?,
            None => DEFAULT_HISTORY_LIMIT,
        };
        let typing_ttl = parse_or(&lookup, "HAVEN_TYPING_TTL_MS", DEFAULT_TYPING_TTL)?;
        if typing_ttl.is_zero() {
            return Err(ClientError::InvalidConfig(
                "HAVEN_TYPING_TTL_MS must be > 0".to_string(),
            ));
        }

        Ok(Self {
            ws_url,
            api_url,
            token: lookup("HAVEN_TOKEN").filter(|t| !t.trim().is_empty()),
            user_id: lookup("HAVEN_USER_ID").filter(|u| !u.trim().is_empty()),
            history_limit,
            reconnect,
            typing_ttl,
        })
    }
}

/// Parses a base URL and makes sure relative joins append to its path.
pub(crate) fn parse_base_url(raw: &str) -> ClientResult<Url> {
    let mut url = Url::parse(raw.trim())?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

fn parse_number<T: std::str::FromStr>(raw: &str, key: &str) -> ClientResult<T> {
    raw.trim()
        .parse()
        .map_err(|_| ClientError::InvalidConfig(format!("{key} is not a valid number: {raw:?}")))
}

fn parse_or(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> ClientResult<Duration> {
    match lookup(key) {
        Some(raw) => Ok(Duration::from_millis(parse_number(&raw, key)?)),
        None => Ok(default),
    }
}
