//! Long-polling ingestion loop.
//!
//! The cursor moves past an update before that update is handled, so one
//! failing update is never fetched again.

use std::{panic::AssertUnwindSafe, sync::Arc, time::Duration};

use futures::FutureExt;
use tokio_util::sync::CancellationToken;

use tgb_core::{config::Config, messaging::types::Update, Result};

use crate::{client::BotClient, dispatcher::panic_message, gate::UpdateGate};

#[derive(Clone, Debug)]
pub struct PollingConfig {
    pub limit: u32,
    /// Long-poll timeout sent to the server.
    pub timeout: Duration,
    /// Pause after a failed fetch.
    pub error_pause: Duration,
    pub allowed_updates: Option<Vec<String>>,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            limit: 100,
            timeout: Duration::from_secs(30),
            error_pause: Duration::from_secs(5),
            allowed_updates: None,
        }
    }
}

impl PollingConfig {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            limit: cfg.poll_limit,
            timeout: cfg.poll_timeout,
            error_pause: cfg.poll_error_pause,
            allowed_updates: None,
        }
    }
}

pub struct Poller {
    client: BotClient,
    gate: Arc<UpdateGate>,
    cfg: PollingConfig,
    cursor: i64,
}

impl Poller {
    pub fn new(client: BotClient, gate: Arc<UpdateGate>, cfg: PollingConfig) -> Self {
        Self {
            client,
            gate,
            cfg,
            cursor: 0,
        }
    }

    /// Resume from a previously saved cursor.
    pub fn with_cursor(mut self, cursor: i64) -> Self {
        self.cursor = cursor;
        self
    }

    /// Offset sent with the next fetch.
    pub fn cursor(&self) -> i64 {
        self.cursor
    }

    /// One fetch-and-handle cycle. A failed fetch is returned as-is and
    /// leaves the cursor untouched. Returns the batch size.
    pub async fn poll_once(&mut self) -> Result<usize> {
        let items = self.fetch().await?;
        let n = items.len();
        self.process(items, None).await;
        Ok(n)
    }

    /// Poll until `cancel` fires.
    pub async fn run(&mut self, cancel: CancellationToken) {
        tracing::info!(cursor = self.cursor, "polling started");

        while !cancel.is_cancelled() {
            let fetched = tokio::select! {
                _ = cancel.cancelled() => break,
                r = self.fetch() => r,
            };

            match fetched {
                Ok(items) => self.process(items, Some(&cancel)).await,
                Err(e) => {
                    tracing::error!(error = %e, cursor = self.cursor, "failed to fetch updates");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.cfg.error_pause) => {}
                    }
                }
            }
        }

        tracing::info!(cursor = self.cursor, "polling stopped");
    }

    async fn fetch(&self) -> Result<Vec<serde_json::Value>> {
        self.client
            .get_updates(
                self.cursor,
                self.cfg.limit,
                self.cfg.timeout,
                self.cfg.allowed_updates.as_deref(),
            )
            .await
    }

    async fn process(&mut self, items: Vec<serde_json::Value>, cancel: Option<&CancellationToken>) {
        for item in items {
            if cancel.is_some_and(CancellationToken::is_cancelled) {
                return;
            }

            let Some(update_id) = item.get("update_id").and_then(serde_json::Value::as_i64) else {
                tracing::warn!("skipping update without update_id");
                continue;
            };
            // Never rewinds on an out-of-order batch.
            self.cursor = self.cursor.max(update_id.saturating_add(1));

            let update = match serde_json::from_value::<Update>(item) {
                Ok(u) => u,
                Err(e) => {
                    tracing::warn!(update_id, error = %e, "skipping malformed update");
                    continue;
                }
            };

            let handled = AssertUnwindSafe(self.gate.handle(&update, &self.client))
                .catch_unwind()
                .await;
            if let Err(panic) = handled {
                tracing::error!(
                    update_id,
                    panic = panic_message(panic.as_ref()),
                    "update handling panicked"
                );
            }
        }
    }
}
