//! Messaging model shared by the adapters: inbound events, keyboards and
//! deferred sends.

pub mod keyboard;
pub mod queue;
pub mod types;
