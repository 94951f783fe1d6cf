//! Admission control: per-bot and per-user rate limiting.
//!
//! The default policy is a fixed-window counter kept in an external
//! [`CounterStore`]. Admission fails open: when the store is missing or
//! erroring, every request is allowed (availability over strict enforcement).

use std::{collections::HashMap, sync::Arc, time::Duration};

use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::{
    domain::UserId,
    store::{CounterStore, SWEEP_INTERVAL},
};

pub const DEFAULT_BOT_LIMIT: u32 = 20;
pub const DEFAULT_USER_LIMIT: u32 = 5;
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(1);

pub const BOT_KEY_PREFIX: &str = "tg_rate_bot_";
pub const USER_KEY_PREFIX: &str = "tg_rate_user_";

/// Which traffic a limiter protects.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scope {
    /// Aggregate outbound traffic of one bot (protects the remote API).
    Bot,
    /// Inbound traffic of one sender (protects this process).
    User,
}

impl Scope {
    pub fn key_prefix(self) -> &'static str {
        match self {
            Scope::Bot => BOT_KEY_PREFIX,
            Scope::User => USER_KEY_PREFIX,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Scope::Bot => "bot",
            Scope::User => "user",
        }
    }
}

/// Counting policy.
///
/// `FixedWindow` sets the expiry only on the first hit of a window, so a
/// burst straddling a window boundary can admit up to `2 × limit`.
/// `TokenBucket` smooths that out but keeps state in-process only.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AdmissionPolicy {
    #[default]
    FixedWindow,
    TokenBucket,
}

impl AdmissionPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "fixed" | "fixed_window" | "fixed-window" => Some(Self::FixedWindow),
            "token_bucket" | "token-bucket" | "bucket" => Some(Self::TokenBucket),
            _ => None,
        }
    }
}

// ============== Token Bucket ==============

#[derive(Clone, Debug)]
struct Bucket {
    tokens: f64,
    last_update: Instant,
}

#[derive(Debug)]
struct TokenBuckets {
    max_tokens: f64,
    refill_per_sec: f64,
    buckets: HashMap<String, Bucket>,
    last_sweep: Option<Instant>,
}

impl TokenBuckets {
    fn new(max_tokens: u32, window: Duration) -> Self {
        let max_tokens = max_tokens as f64;
        let window_secs = window.as_secs_f64().max(1e-9);
        Self {
            max_tokens,
            refill_per_sec: max_tokens / window_secs,
            buckets: HashMap::new(),
            last_sweep: None,
        }
    }

    /// Drop buckets that have refilled completely; a fresh bucket is identical.
    fn sweep(&mut self, now: Instant) {
        let (max_tokens, rate) = (self.max_tokens, self.refill_per_sec);
        self.buckets.retain(|_, b| {
            let elapsed = now.duration_since(b.last_update).as_secs_f64();
            b.tokens + elapsed * rate < max_tokens
        });
        self.last_sweep = Some(now);
    }

    fn check_at(&mut self, key: &str, now: Instant) -> bool {
        if self
            .last_sweep
            .map_or(true, |at| now.duration_since(at) >= SWEEP_INTERVAL)
        {
            self.sweep(now);
        }
        let max_tokens = self.max_tokens;
        let bucket = self.buckets.entry(key.to_string()).or_insert_with(|| Bucket {
            tokens: max_tokens,
            last_update: now,
        });

        let elapsed = now.duration_since(bucket.last_update).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(max_tokens);
        bucket.last_update = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            return true;
        }
        false
    }
}

enum Backend {
    FixedWindow(Option<Arc<dyn CounterStore>>),
    TokenBucket(Mutex<TokenBuckets>),
}

// ============== Admission Control ==============

/// Decides whether a caller within one [`Scope`] may proceed. Never fails.
pub struct AdmissionControl {
    scope: Scope,
    limit: u32,
    window: Duration,
    backend: Backend,
}

impl AdmissionControl {
    pub fn new(
        scope: Scope,
        limit: u32,
        window: Duration,
        policy: AdmissionPolicy,
        store: Option<Arc<dyn CounterStore>>,
    ) -> Self {
        let backend = match policy {
            AdmissionPolicy::FixedWindow => Backend::FixedWindow(store),
            AdmissionPolicy::TokenBucket => {
                Backend::TokenBucket(Mutex::new(TokenBuckets::new(limit, window)))
            }
        };
        Self {
            scope,
            limit,
            window,
            backend,
        }
    }

    /// Per-bot limiter with the default 20 requests/second.
    pub fn for_bot(store: Option<Arc<dyn CounterStore>>) -> Self {
        Self::new(
            Scope::Bot,
            DEFAULT_BOT_LIMIT,
            DEFAULT_WINDOW,
            AdmissionPolicy::FixedWindow,
            store,
        )
    }

    /// Per-user limiter with the default 5 requests/second.
    pub fn for_users(store: Option<Arc<dyn CounterStore>>) -> Self {
        Self::new(
            Scope::User,
            DEFAULT_USER_LIMIT,
            DEFAULT_WINDOW,
            AdmissionPolicy::FixedWindow,
            store,
        )
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Admit one request for `identity` within this limiter's scope.
    pub async fn allow(&self, identity: &str) -> bool {
        let key = format!("{}{identity}", self.scope.key_prefix());
        let allowed = match &self.backend {
            Backend::FixedWindow(None) => true,
            Backend::FixedWindow(Some(store)) => self.allow_fixed_window(store.as_ref(), &key).await,
            Backend::TokenBucket(buckets) => buckets.lock().await.check_at(&key, Instant::now()),
        };
        if !allowed {
            tracing::debug!(scope = self.scope.as_str(), key = %key, limit = self.limit, "admission denied");
        }
        allowed
    }

    pub async fn allow_user(&self, user_id: UserId) -> bool {
        self.allow(&user_id.0.to_string()).await
    }

    /// Admit one outbound call for the bot owning `token`. The token itself
    /// never ends up in a store key.
    pub async fn allow_bot(&self, token: &str) -> bool {
        self.allow(&bot_identity(token)).await
    }

    async fn allow_fixed_window(&self, store: &dyn CounterStore, key: &str) -> bool {
        let count = match store.increment(key).await {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(scope = self.scope.as_str(), key = %key, error = %e, "counter store unavailable; admitting");
                return true;
            }
        };
        if count == 1 {
            if let Err(e) = store.set_expiry(key, self.window).await {
                tracing::warn!(scope = self.scope.as_str(), key = %key, error = %e, "failed to set counter expiry; admitting");
                return true;
            }
        }
        count <= i64::from(self.limit)
    }
}

impl std::fmt::Debug for AdmissionControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let policy = match &self.backend {
            Backend::FixedWindow(store) => {
                if store.is_some() {
                    "fixed_window"
                } else {
                    "fixed_window(no store)"
                }
            }
            Backend::TokenBucket(_) => "token_bucket",
        };
        f.debug_struct("AdmissionControl")
            .field("scope", &self.scope)
            .field("limit", &self.limit)
            .field("window", &self.window)
            .field("policy", &policy)
            .finish()
    }
}

/// Stable, non-reversible identity for a bot token.
pub fn bot_identity(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    digest.iter().take(16).map(|b| format!("{b:02x}")).collect()
}
