//! Telegram gateway for Tadhkir.
//!
//! Implements the gateway protocol on top of the Bot API `getUpdates`
//! long-poll. Every [`TelegramConnector::connect`] call builds a new
//! [`TelegramSession`] with its own HTTP client, so a replacement session
//! never shares pooled connections with the one it replaces.

mod errors;
mod session;

pub use errors::{delivery_error, gateway_error};
pub use session::{TelegramConfig, TelegramConnector, TelegramSession};
