//! Gateway integrations.
//!
//! Tadhkir drives exactly one gateway session at a time. Platforms plug in by
//! implementing the protocol traits:
//!
//! - [`GatewayConnector`]: builds a new session on every call
//! - [`GatewaySession`]: long-poll loop, sends, graceful stop and abort
//!
//! # Session flow
//!
//! ```text
//!  LifecycleController::start()
//!       │  GatewayConnector::connect()           fresh transport
//!       ▼
//!  SessionHandle::attach_handlers()             [session.rs]
//!       │  GatewayEvent::MessageReceived ─▶ subscribe / unsubscribe
//!       │  GatewayEvent::Error           ─▶ controller recovery
//!       ▼
//!  SessionHandle::start_polling()
//!       │
//!       ▼
//!  BroadcastTask::arm()                         [broadcast.rs]
//! ```

// Re-export protocol types from the protocol crate
pub use tadhkir_gateway_protocol::{
    ChatId, DeliveryError, ErrorSeverity, EventSender, GatewayConnector, GatewayError,
    GatewayEvent, GatewaySession, InboundMessage, PollOptions, TransportOptions, error_codes,
};

// Re-export Telegram gateway from the telegram crate
#[cfg(feature = "gateway-telegram")]
pub use tadhkir_gateway_telegram::{TelegramConfig, TelegramConnector, TelegramSession};
