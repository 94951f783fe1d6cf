//! Counter stores backing fixed-window admission control.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::Result;

/// Shared key/value counter store with an atomic increment primitive.
///
/// Any store with `INCR` + `EXPIRE` semantics fits (Redis, memcached, ...).
/// Expired keys are the store's business: callers never delete counters.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically increment `key` (created at 0 if missing) and return the new value.
    async fn increment(&self, key: &str) -> Result<i64>;

    /// Expire `key` after `ttl`. No-op for a missing key.
    async fn set_expiry(&self, key: &str, ttl: Duration) -> Result<()>;
}

#[derive(Clone, Copy, Debug)]
struct Counter {
    count: i64,
    expires_at: Option<Instant>,
}

impl Counter {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// Interval between sweeps of expired counters.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Default)]
struct Counters {
    map: HashMap<String, Counter>,
    last_sweep: Option<Instant>,
}

impl Counters {
    fn sweep(&mut self, now: Instant) {
        self.map.retain(|_, c| !c.is_expired(now));
        self.last_sweep = Some(now);
    }

    fn sweep_due(&self, now: Instant) -> bool {
        self.last_sweep
            .map_or(true, |at| now.duration_since(at) >= SWEEP_INTERVAL)
    }
}

/// In-process counter store.
///
/// Suitable for a single process. Expired counters are reset when their key
/// is touched again and dropped by a sweep that `increment` runs at most
/// once per [`SWEEP_INTERVAL`].
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    counters: Mutex<Counters>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (non-expired) counters.
    pub async fn len(&self) -> usize {
        let mut counters = self.counters.lock().await;
        counters.sweep(Instant::now());
        counters.map.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn increment(&self, key: &str) -> Result<i64> {
        let now = Instant::now();
        let mut counters = self.counters.lock().await;
        if counters.sweep_due(now) {
            counters.sweep(now);
        }
        let counter = counters.map.entry(key.to_string()).or_insert(Counter {
            count: 0,
            expires_at: None,
        });
        if counter.is_expired(now) {
            *counter = Counter {
                count: 0,
                expires_at: None,
            };
        }
        counter.count += 1;
        Ok(counter.count)
    }

    async fn set_expiry(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut counters = self.counters.lock().await;
        if let Some(counter) = counters.map.get_mut(key) {
            counter.expires_at = Some(Instant::now() + ttl);
        }
        Ok(())
    }
}
