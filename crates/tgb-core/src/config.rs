use std::{collections::BTreeMap, env, time::Duration};

use crate::{admission::AdmissionPolicy, errors::Error, Result};

pub const DEFAULT_API_URL: &str = "https://api.telegram.org/bot";
pub const DEFAULT_FILE_URL: &str = "https://api.telegram.org/file/bot";
pub const DEFAULT_BOT_NAME: &str = "default";

/// Typed configuration, read from the environment (and `.env` if present).
#[derive(Clone)]
pub struct Config {
    // Bots
    pub bots: BTreeMap<String, String>,
    pub default_bot: String,
    /// Bot the binary runs (`TELEGRAM_BOT`); `None` means the default bot.
    pub active_bot: Option<String>,

    // Transport
    pub api_url: String,
    pub file_url: String,
    pub http_timeout: Duration,
    pub retry_attempts: u32,
    pub backoff_unit: Duration,
    pub log_requests: bool,

    // Rate limiting
    pub bot_rate_limit: u32,
    pub user_rate_limit: u32,
    pub user_rate_window: Duration,
    pub rate_limit_policy: AdmissionPolicy,

    // Polling
    pub poll_limit: u32,
    pub poll_timeout: Duration,
    pub poll_error_pause: Duration,
}

impl Config {
    pub fn load() -> Result<Self> {
        // Existing environment wins over `.env`.
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (the environment in production).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).and_then(non_empty);

        let mut bots = parse_bots(get("TELEGRAM_BOTS").as_deref())?;
        if let Some(token) = get("TELEGRAM_BOT_TOKEN") {
            bots.entry(DEFAULT_BOT_NAME.to_string())
                .or_insert_with(|| token.trim().to_string());
        }
        if bots.is_empty() {
            return Err(Error::Config(
                "TELEGRAM_BOT_TOKEN or TELEGRAM_BOTS environment variable is required".to_string(),
            ));
        }

        let default_bot = match get("TELEGRAM_DEFAULT_BOT") {
            Some(name) => name.trim().to_string(),
            None if bots.contains_key(DEFAULT_BOT_NAME) => DEFAULT_BOT_NAME.to_string(),
            // First configured bot, in name order.
            None => bots.keys().next().cloned().unwrap_or_default(),
        };

        let active_bot = get("TELEGRAM_BOT").map(|name| name.trim().to_string());
        if let Some(name) = active_bot.as_deref() {
            if !bots.contains_key(name) {
                return Err(Error::Config(format!(
                    "TELEGRAM_BOT `{name}` is not configured (available: {})",
                    bots.keys().cloned().collect::<Vec<_>>().join(", ")
                )));
            }
        }

        let rate_limit_policy = match get("RATE_LIMIT_POLICY") {
            Some(raw) => AdmissionPolicy::parse(&raw).ok_or_else(|| {
                Error::Config(format!(
                    "RATE_LIMIT_POLICY must be `fixed` or `token_bucket`, got `{raw}`"
                ))
            })?,
            None => AdmissionPolicy::FixedWindow,
        };

        let u64_of = |key: &str| get(key).and_then(|s| s.trim().parse::<u64>().ok());
        let u32_of = |key: &str| get(key).and_then(|s| s.trim().parse::<u32>().ok());
        let bool_of = |key: &str| {
            get(key).map(|s| {
                matches!(
                    s.trim().to_lowercase().as_str(),
                    "1" | "true" | "yes" | "on"
                )
            })
        };

        Ok(Self {
            bots,
            default_bot,
            active_bot,
            api_url: get("TELEGRAM_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            file_url: get("TELEGRAM_FILE_URL").unwrap_or_else(|| DEFAULT_FILE_URL.to_string()),
            http_timeout: Duration::from_secs(u64_of("TELEGRAM_TIMEOUT_SECS").unwrap_or(5)),
            retry_attempts: u32_of("TELEGRAM_RETRY_ATTEMPTS").unwrap_or(3).max(1),
            backoff_unit: Duration::from_millis(u64_of("TELEGRAM_BACKOFF_MS").unwrap_or(1000)),
            log_requests: bool_of("LOG_REQUESTS").unwrap_or(true),
            bot_rate_limit: u32_of("RATE_LIMIT_PER_SECOND").unwrap_or(20),
            user_rate_limit: u32_of("USER_RATE_LIMIT").unwrap_or(5),
            user_rate_window: Duration::from_secs(u64_of("USER_RATE_WINDOW").unwrap_or(1).max(1)),
            rate_limit_policy,
            poll_limit: u32_of("POLL_LIMIT").unwrap_or(100).clamp(1, 100),
            poll_timeout: Duration::from_secs(u64_of("POLL_TIMEOUT_SECS").unwrap_or(30)),
            poll_error_pause: Duration::from_secs(u64_of("POLL_ERROR_PAUSE_SECS").unwrap_or(5)),
        })
    }

    pub fn bot_names(&self) -> Vec<String> {
        self.bots.keys().cloned().collect()
    }

    /// Name of the bot the binary runs.
    pub fn active_bot_name(&self) -> &str {
        self.active_bot.as_deref().unwrap_or(&self.default_bot)
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("bots", &self.bot_names())
            .field("default_bot", &self.default_bot)
            .field("active_bot", &self.active_bot)
            .field("api_url", &self.api_url)
            .field("http_timeout", &self.http_timeout)
            .field("retry_attempts", &self.retry_attempts)
            .field("backoff_unit", &self.backoff_unit)
            .field("bot_rate_limit", &self.bot_rate_limit)
            .field("user_rate_limit", &self.user_rate_limit)
            .field("user_rate_window", &self.user_rate_window)
            .field("rate_limit_policy", &self.rate_limit_policy)
            .field("poll_limit", &self.poll_limit)
            .field("poll_timeout", &self.poll_timeout)
            .finish_non_exhaustive()
    }
}

/// Parse `name=token,name2=token2`.
fn parse_bots(raw: Option<&str>) -> Result<BTreeMap<String, String>> {
    let mut out = BTreeMap::new();
    let Some(raw) = raw else {
        return Ok(out);
    };
    for entry in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let Some((name, token)) = entry.split_once('=') else {
            return Err(Error::Config(format!(
                "TELEGRAM_BOTS entries must look like name=token (got `{}`)",
                entry.split(':').next().unwrap_or_default()
            )));
        };
        let (name, token) = (name.trim(), token.trim());
        if name.is_empty() || token.is_empty() {
            return Err(Error::Config(
                "TELEGRAM_BOTS entries need both a name and a token".to_string(),
            ));
        }
        out.insert(name.to_string(), token.to_string());
    }
    Ok(out)
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
