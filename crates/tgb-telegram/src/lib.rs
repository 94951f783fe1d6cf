//! Telegram Bot API adapter.
//!
//! A retrying JSON-over-HTTP client ([`BotClient`]) plus the inbound side:
//! command/callback [`Dispatcher`], per-user [`UpdateGate`], long-polling
//! [`Poller`] and the webhook entry point.

pub mod api;
pub mod client;
pub mod dispatcher;
pub mod files;
pub mod gate;
pub mod manager;
pub mod polling;
pub mod queue;
pub mod webhook;

#[cfg(test)]
mod fake;

pub use client::{ApiResponse, BotClient, ClientConfig, HttpSender, Params};
pub use dispatcher::{Dispatcher, Handler};
pub use gate::{GateOutcome, UpdateGate};
pub use manager::BotManager;
pub use polling::{Poller, PollingConfig};
