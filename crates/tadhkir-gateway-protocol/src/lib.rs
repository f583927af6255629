//! Gateway protocol types for Tadhkir.
//!
//! A gateway is a messaging platform reached through a long-poll session.
//! Tadhkir never talks to a platform directly; it drives sessions through the
//! two traits defined here:
//!
//! - [`GatewayConnector`]: builds a brand-new [`GatewaySession`] per call
//! - [`GatewaySession`]: start/stop/abort the poll loop, send messages
//!
//! Inbound traffic flows back over an mpsc channel as [`GatewayEvent`]s.
//!
//! ```text
//!  Tadhkir core                         Gateway (Telegram/...)
//!  ────────────                         ──────────────────────
//!  connect(TransportOptions) ─────────▶ new session
//!  start_polling(PollOptions, tx) ────▶ poll loop ──┐
//!                                                   │ GatewayEvent::MessageReceived
//!  dispatcher ◀──────────────────────── tx ◀────────┤ GatewayEvent::Error
//!  send_message(chat, text) ──────────▶ platform API
//!  stop_polling(timeout) / abort() ───▶ poll loop exits
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

/// HTTP-like status codes carried by [`GatewayError::Api`].
pub mod error_codes {
    pub const UNAUTHORIZED: u16 = 401;
    pub const NOT_FOUND: u16 = 404;
    /// Another poller holds the session for the same credentials.
    pub const CONFLICT: u16 = 409;
    pub const TOO_MANY_REQUESTS: u16 = 429;
}

/// Capacity of the event channel handed to [`GatewaySession::start_polling`].
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

// ============================================================================
// Identifiers & events
// ============================================================================

/// Opaque conversation identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(String);

impl ChatId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<i64> for ChatId {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

impl From<&str> for ChatId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ChatId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A text message received from a conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub chat_id: ChatId,
    pub text: String,
}

/// Events emitted by a polling session.
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    MessageReceived(InboundMessage),
    /// Asynchronous failure reported by the poll loop.
    Error(GatewayError),
}

pub type EventSender = mpsc::Sender<GatewayEvent>;
pub type EventReceiver = mpsc::Receiver<GatewayEvent>;

// ============================================================================
// Options
// ============================================================================

/// Transport settings applied when a session is constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportOptions {
    /// Upper bound for a single HTTP request, long-poll included.
    pub request_timeout: Duration,
    /// Build a dedicated connection pool instead of reusing a shared one.
    pub fresh_connection: bool,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            fresh_connection: true,
        }
    }
}

/// Long-poll loop settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollOptions {
    /// Server-side wait for a single poll request.
    pub timeout: Duration,
    /// Maximum number of updates retrieved per poll.
    pub limit: u8,
    /// Minimum delay between two polls.
    pub interval: Duration,
    /// Delay before polling again after a failed poll.
    pub retry_after: Duration,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            limit: 100,
            interval: Duration::from_secs(2),
            retry_after: Duration::from_secs(5),
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

/// How the session owner should react to a [`GatewayError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Log and keep polling.
    Transient,
    /// The session cannot recover; stop it.
    Fatal,
    /// Another session holds the credentials; stop and cool down.
    Conflict,
}

/// Session-level gateway failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    /// Network failure or timeout talking to the platform.
    #[error("transport error: {0}")]
    Transport(String),

    /// The platform answered with an error status.
    #[error("api error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("session is already polling")]
    AlreadyPolling,

    #[error("polling did not stop within {0:?}")]
    StopTimeout(Duration),

    /// The session was aborted or its event receiver is gone.
    #[error("session closed")]
    Closed,
}

impl GatewayError {
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::api(error_codes::CONFLICT, message)
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_conflict(&self) -> bool {
        self.status() == Some(error_codes::CONFLICT)
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Api { status, .. } => match *status {
                error_codes::CONFLICT => ErrorSeverity::Conflict,
                error_codes::UNAUTHORIZED | error_codes::NOT_FOUND => ErrorSeverity::Fatal,
                _ => ErrorSeverity::Transient,
            },
            Self::Closed => ErrorSeverity::Fatal,
            Self::Transport(_) | Self::AlreadyPolling | Self::StopTimeout(_) => {
                ErrorSeverity::Transient
            }
        }
    }
}

/// Per-recipient send failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    /// Recipient blocked the bot, left, or no longer exists.
    #[error("recipient unreachable: {0}")]
    Unreachable(String),

    #[error("delivery failed: {0}")]
    Other(String),
}

impl DeliveryError {
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::Unreachable(_))
    }
}

// ============================================================================
// Traits
// ============================================================================

/// One long-poll connection to a messaging platform.
///
/// A session is single-use: once stopped or aborted it is never restarted.
#[async_trait]
pub trait GatewaySession: Send + Sync {
    /// Begin the poll loop. Events are delivered on `events` until the loop
    /// exits. Fails with [`GatewayError::AlreadyPolling`] if already running.
    async fn start_polling(
        &self,
        options: PollOptions,
        events: EventSender,
    ) -> Result<(), GatewayError>;

    /// Request a graceful stop and wait up to `timeout` for the loop to exit.
    /// Returns `Ok` when the session is not polling.
    async fn stop_polling(&self, timeout: Duration) -> Result<(), GatewayError>;

    /// Sever the transport immediately, whatever the poll loop is doing.
    fn abort(&self) -> Result<(), GatewayError>;

    fn is_polling(&self) -> bool;

    async fn send_message(&self, chat_id: &ChatId, text: &str) -> Result<(), DeliveryError>;
}

/// Factory for [`GatewaySession`]s.
#[async_trait]
pub trait GatewayConnector: Send + Sync {
    /// Short platform name used in logs.
    fn name(&self) -> &str;

    /// Build a new session. Never returns a previously used session.
    async fn connect(
        &self,
        transport: &TransportOptions,
    ) -> Result<Arc<dyn GatewaySession>, GatewayError>;
}

// ============================================================================
// Tests
// ============================================================================
