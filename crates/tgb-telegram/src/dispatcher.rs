//! Routes one inbound update to a registered handler.
//!
//! Commands are keyed by their lower-cased first token (`/start`), callbacks
//! by their exact `data` string. `/default` and `/callback` are the reserved
//! fallbacks. Handler errors and panics stop here.

use std::{any::Any, collections::HashMap, future::Future, panic::AssertUnwindSafe, sync::Arc};

use async_trait::async_trait;
use futures::FutureExt;

use tgb_core::messaging::types::{CallbackQuery, Message, Update, UpdateKind};

use crate::client::BotClient;

pub const DEFAULT_MESSAGE_KEY: &str = "/default";
pub const DEFAULT_CALLBACK_KEY: &str = "/callback";

pub const CALLBACK_ERROR_TEXT: &str = "Error occurred";

/// Handles messages, callbacks, or both. A handler registered under a key
/// only receives the event kinds it claims; other kinds fall through to the
/// reserved fallback keys.
#[async_trait]
pub trait Handler: Send + Sync {
    fn handles_messages(&self) -> bool {
        true
    }

    fn handles_callbacks(&self) -> bool {
        true
    }

    async fn handle_message(&self, _message: &Message, _client: &BotClient) -> anyhow::Result<()> {
        Ok(())
    }

    async fn handle_callback(
        &self,
        _query: &CallbackQuery,
        _client: &BotClient,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Message handler from an async closure.
pub struct MessageFn<F>(pub F);

#[async_trait]
impl<F, Fut> Handler for MessageFn<F>
where
    F: Fn(Message, BotClient) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    fn handles_callbacks(&self) -> bool {
        false
    }

    async fn handle_message(&self, message: &Message, client: &BotClient) -> anyhow::Result<()> {
        (self.0)(message.clone(), client.clone()).await
    }
}

/// Callback handler from an async closure.
pub struct CallbackFn<F>(pub F);

#[async_trait]
impl<F, Fut> Handler for CallbackFn<F>
where
    F: Fn(CallbackQuery, BotClient) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    fn handles_messages(&self) -> bool {
        false
    }

    async fn handle_callback(
        &self,
        query: &CallbackQuery,
        client: &BotClient,
    ) -> anyhow::Result<()> {
        (self.0)(query.clone(), client.clone()).await
    }
}

#[derive(Default)]
pub struct Dispatcher {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        keys.sort_unstable();
        f.debug_struct("Dispatcher").field("keys", &keys).finish()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the handler for `key`. Command keys (leading
    /// `/`) are lower-cased; callback data keys are kept verbatim.
    pub fn register(&mut self, key: &str, handler: Arc<dyn Handler>) -> &mut Self {
        let key = if key.starts_with('/') {
            key.to_lowercase()
        } else {
            key.to_string()
        };
        self.handlers.insert(key, handler);
        self
    }

    pub fn on_command<F, Fut>(&mut self, command: &str, f: F) -> &mut Self
    where
        F: Fn(Message, BotClient) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.register(command, Arc::new(MessageFn(f)))
    }

    pub fn on_callback<F, Fut>(&mut self, data: &str, f: F) -> &mut Self
    where
        F: Fn(CallbackQuery, BotClient) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.register(data, Arc::new(CallbackFn(f)))
    }

    pub fn has(&self, key: &str) -> bool {
        self.handlers.contains_key(key)
    }

    /// Route `update`. `true` only when a handler ran and returned `Ok`.
    pub async fn handle_update(&self, update: &Update, client: &BotClient) -> bool {
        match update.kind() {
            UpdateKind::Message(message) => self.dispatch_message(update, message, client).await,
            UpdateKind::CallbackQuery(query) => self.dispatch_callback(update, query, client).await,
            UpdateKind::Other => {
                tracing::debug!(update_id = update.update_id, "unhandled update type");
                false
            }
        }
    }

    fn message_route(&self, message: &Message) -> Option<(&str, &Arc<dyn Handler>)> {
        let command = message
            .text()
            .filter(|t| t.starts_with('/'))
            .and_then(|t| t.split_whitespace().next())
            .map(str::to_lowercase);

        let lookup = |key: &str| {
            self.handlers
                .get_key_value(key)
                .filter(|(_, h)| h.handles_messages())
                .map(|(k, h)| (k.as_str(), h))
        };
        command
            .and_then(|c| lookup(c.as_str()))
            .or_else(|| lookup(DEFAULT_MESSAGE_KEY))
    }

    fn callback_route(&self, query: &CallbackQuery) -> Option<(&str, &Arc<dyn Handler>)> {
        let lookup = |key: &str| {
            self.handlers
                .get_key_value(key)
                .filter(|(_, h)| h.handles_callbacks())
                .map(|(k, h)| (k.as_str(), h))
        };
        query
            .data()
            .filter(|d| !d.is_empty())
            .and_then(lookup)
            .or_else(|| lookup(DEFAULT_CALLBACK_KEY))
    }

    async fn dispatch_message(&self, update: &Update, message: &Message, client: &BotClient) -> bool {
        let Some((key, handler)) = self.message_route(message) else {
            tracing::debug!(update_id = update.update_id, "no handler for message");
            return false;
        };

        let outcome = AssertUnwindSafe(handler.handle_message(message, client))
            .catch_unwind()
            .await;
        match flatten(outcome) {
            Ok(()) => true,
            Err(error) => {
                tracing::error!(
                    key,
                    update_id = update.update_id,
                    chat_id = %message.chat_id(),
                    error = %error,
                    "message handler failed"
                );
                false
            }
        }
    }

    async fn dispatch_callback(
        &self,
        update: &Update,
        query: &CallbackQuery,
        client: &BotClient,
    ) -> bool {
        let Some((key, handler)) = self.callback_route(query) else {
            tracing::debug!(update_id = update.update_id, "no handler for callback");
            return false;
        };

        let outcome = AssertUnwindSafe(handler.handle_callback(query, client))
            .catch_unwind()
            .await;
        match flatten(outcome) {
            Ok(()) => true,
            Err(error) => {
                tracing::error!(
                    key,
                    update_id = update.update_id,
                    chat_id = ?update.chat_id().map(|c| c.0),
                    error = %error,
                    "callback handler failed"
                );
                if let Err(e) = client
                    .answer_callback_query(&query.id, Some(CALLBACK_ERROR_TEXT), false)
                    .await
                {
                    tracing::debug!(error = %e, "failed to acknowledge failed callback");
                }
                false
            }
        }
    }
}

fn flatten(
    outcome: std::result::Result<anyhow::Result<()>, Box<dyn Any + Send>>,
) -> std::result::Result<(), String> {
    match outcome {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(format!("{e:#}")),
        Err(panic) => Err(format!("panicked: {}", panic_message(panic.as_ref()))),
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}
