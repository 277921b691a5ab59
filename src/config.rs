use std::str::FromStr;
use std::time::Duration;

use crate::errors::AppError;

const DEFAULT_API_BASE: &str = "http://localhost:8000";
const DEFAULT_FLUSH_INTERVAL_MS: u64 = 100;
const DEFAULT_READ_TIMEOUT_SECS: u64 = 60;
const DEFAULT_TITLE_MAX_CHARS: usize = 60;

/// Runtime settings for the client core, read from the environment.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the assistant and persistence API (no trailing slash).
    pub api_base: String,
    /// Opaque credential forwarded verbatim as the `Cookie` header.
    pub session_cookie: Option<String>,
    /// Throttle period for copying streamed text into the message log.
    pub flush_interval: Duration,
    /// Upper bound for the transport open and for each frame read.
    pub read_timeout: Duration,
    pub title_max_chars: usize,
    /// When set, the client persists both sides of an exchange itself and asks
    /// the server to skip saving.
    pub client_side_save: bool,
    /// Use the in-memory persistence store instead of the HTTP one.
    pub offline: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            session_cookie: None,
            flush_interval: Duration::from_millis(DEFAULT_FLUSH_INTERVAL_MS),
            read_timeout: Duration::from_secs(DEFAULT_READ_TIMEOUT_SECS),
            title_max_chars: DEFAULT_TITLE_MAX_CHARS,
            client_side_save: false,
            offline: false,
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup so it can be tested
    /// without touching the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let defaults = Self::default();

        let api_base = lookup("CHAT_API_BASE")
            .map(|s| s.trim_end_matches('/').to_string())
            .unwrap_or(defaults.api_base);
        let session_cookie = lookup("CHAT_SESSION_COOKIE").filter(|s| !s.is_empty());

        let flush_interval = parse_var::<u64>(&lookup, "CHAT_FLUSH_INTERVAL_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.flush_interval);
        if flush_interval.is_zero() {
            return Err(AppError::Config {
                message: "CHAT_FLUSH_INTERVAL_MS must be greater than zero".to_string(),
            });
        }

        let read_timeout = parse_var::<u64>(&lookup, "CHAT_READ_TIMEOUT_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.read_timeout);
        let title_max_chars =
            parse_var::<usize>(&lookup, "CHAT_TITLE_MAX_CHARS")?.unwrap_or(defaults.title_max_chars);
        let client_side_save =
            parse_var::<bool>(&lookup, "CHAT_CLIENT_SIDE_SAVE")?.unwrap_or(defaults.client_side_save);
        let offline = parse_var::<bool>(&lookup, "CHAT_OFFLINE")?.unwrap_or(defaults.offline);

        Ok(Self {
            api_base,
            session_cookie,
            flush_interval,
            read_timeout,
            title_max_chars,
            client_side_save,
            offline,
        })
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, AppError> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| AppError::Config {
            message: format!("{key} has an invalid value '{raw}'"),
        }),
    }
}
