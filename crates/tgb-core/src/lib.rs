//! Core domain for the Telegram bot client.
//!
//! This crate is intentionally transport-agnostic. The Bot API HTTP client,
//! dispatcher and polling loop live in `tgb-telegram`.

pub mod admission;
pub mod config;
pub mod domain;
pub mod errors;
pub mod formatting;
pub mod logging;
pub mod messaging;
pub mod store;

pub use errors::{Error, Result};
