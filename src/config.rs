use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use tracing::warn;

use crate::errors::{RealtimeError, Result};
use crate::pagination::PAGE_SIZE;
use crate::reconnect::ReconnectPolicy;
use crate::typing::TYPING_IDLE_TIMEOUT;

pub const DEFAULT_WS_URL: &str = "ws://localhost:8080/ws";
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8080";

#[derive(Debug, Clone, PartialEq)]
pub struct RealtimeConfig {
    pub ws_url: String,
    pub api_base_url: String,
    pub page_size: usize,
    pub reconnect: ReconnectPolicy,
    pub typing_idle: Duration,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            ws_url: DEFAULT_WS_URL.to_string(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            page_size: PAGE_SIZE,
            reconnect: ReconnectPolicy::default(),
            typing_idle: TYPING_IDLE_TIMEOUT,
        }
    }
}

impl RealtimeConfig {
    /// Reads the process environment. Call `dotenvy::dotenv()` first to pick up `.env`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from any key lookup. Unparseable values fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let text = |key: &str, default: String| {
            lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty()).unwrap_or(default)
        };

        let page_size = parse_or(&lookup, "MESSAGE_PAGE_SIZE", defaults.page_size);
        let page_size = if page_size == 0 {
            warn!("MESSAGE_PAGE_SIZE must be positive, using {}", defaults.page_size);
            defaults.page_size
        } else {
            page_size
        };

        let mut reconnect = defaults.reconnect.clone();
        let max_attempts: u32 =
            parse_or(&lookup, "RECONNECT_MAX_ATTEMPTS", reconnect.max_attempts.unwrap_or(0));
        reconnect.max_attempts = Some(max_attempts);
        reconnect.initial_delay = Duration::from_millis(parse_or(
            &lookup,
            "RECONNECT_INITIAL_DELAY_MS",
            reconnect.initial_delay.as_millis() as u64,
        ));
        reconnect.max_delay = Duration::from_millis(parse_or(
            &lookup,
            "RECONNECT_MAX_DELAY_MS",
            reconnect.max_delay.as_millis() as u64,
        ));
        if reconnect.max_delay < reconnect.initial_delay {
            warn!("RECONNECT_MAX_DELAY_MS below initial delay, raising it");
            reconnect.max_delay = reconnect.initial_delay;
        }

        Self {
            ws_url: text("NEXT_PUBLIC_WS_URL", defaults.ws_url),
            api_base_url: text("API_BASE_URL", defaults.api_base_url),
            page_size,
            reconnect,
            ..defaults
        }
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr + std::fmt::Display,
{
    match lookup(key) {
        None => default,
        Some(raw) => match raw.trim().parse() {
            Ok(v) => v,
            Err(_) => {
                warn!(key, value = %raw, "invalid value, using default {default}");
                default
            }
        },
    }
}

/// Source of the bearer token used for the socket and REST calls.
pub trait TokenStore: Send + Sync {
    /// `Ok(None)` when no token is stored.
    fn load(&self) -> Result<Option<String>>;

    fn require(&self) -> Result<String> {
        self.load()?.ok_or(RealtimeError::MissingToken)
    }
}

/// Token held in memory.
#[derive(Debug, Default)]
pub struct MemoryTokenStore(RwLock<Option<String>>);

impl MemoryTokenStore {
    pub fn new(token: impl Into<String>) -> Self {
        Self(RwLock::new(Some(token.into())))
    }

    pub fn set(&self, token: Option<String>) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = token;
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> Result<Option<String>> {
        let token = self.0.read().unwrap_or_else(PoisonError::into_inner).clone();
        Ok(token.filter(|t| !t.is_empty()))
    }
}

/// Token read from a file on every load, so rotated tokens are picked up.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> Result<Option<String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => {
                let token = contents.trim();
                Ok((!token.is_empty()).then(|| token.to_string()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(RealtimeError::TokenStore(e)),
        }
    }
}

/// Token store selected by `ACCESS_TOKEN_FILE`, falling back to `ACCESS_TOKEN`.
pub fn token_store_from_env() -> Box<dyn TokenStore> {
    if let Ok(path) = std::env::var("ACCESS_TOKEN_FILE") {
        return Box::new(FileTokenStore::new(path));
    }
    match std::env::var("ACCESS_TOKEN") {
        Ok(token) => Box::new(MemoryTokenStore::new(token)),
        Err(_) => Box::new(MemoryTokenStore::default()),
    }
}
