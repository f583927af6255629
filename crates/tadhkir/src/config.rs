use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;

use tokio::fs;

use serde::Deserialize;
use tadhkir_gateway_protocol::{PollOptions, TransportOptions};
use thiserror::Error;

/// Config file used when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "tadhkir.yaml";

// ============================================================================
// Config (root)
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    #[serde(default)]
    pub broadcast: BroadcastConfig,
    #[serde(default)]
    pub commands: CommandsConfig,
}

impl Config {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = match fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(ConfigError::Io(e)),
        };
        Ok(serde_saphyr::from_str(&contents)?)
    }
}

// ============================================================================
// ServerConfig
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Start can spend several settling delays before it answers.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_request_timeout() -> u64 {
    120
}

// ============================================================================
// GatewayConfig
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct GatewayConfig {
    /// Bot token. `TELEGRAM_BOT_TOKEN` takes precedence when set.
    #[serde(default)]
    pub token: Option<String>,
    /// Must exceed `poll_timeout_seconds`, or every long-poll times out client-side.
    #[serde(default = "default_gateway_request_timeout")]
    pub request_timeout_seconds: u64,
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_seconds: u64,
    #[serde(default = "default_poll_limit")]
    pub poll_limit: u8,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_retry_after")]
    pub retry_after_ms: u64,
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_seconds: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            token: None,
            request_timeout_seconds: default_gateway_request_timeout(),
            poll_timeout_seconds: default_poll_timeout(),
            poll_limit: default_poll_limit(),
            poll_interval_ms: default_poll_interval(),
            retry_after_ms: default_retry_after(),
            stop_timeout_seconds: default_stop_timeout(),
        }
    }
}

impl GatewayConfig {
    pub fn transport_options(&self) -> TransportOptions {
        TransportOptions {
            request_timeout: Duration::from_secs(self.request_timeout_seconds),
            fresh_connection: true,
        }
    }

    pub fn poll_options(&self) -> PollOptions {
        PollOptions {
            timeout: Duration::from_secs(self.poll_timeout_seconds),
            limit: self.poll_limit,
            interval: Duration::from_millis(self.poll_interval_ms),
            retry_after: Duration::from_millis(self.retry_after_ms),
        }
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_seconds)
    }
}

fn default_gateway_request_timeout() -> u64 {
    40
}

fn default_poll_timeout() -> u64 {
    30
}

fn default_poll_limit() -> u8 {
    100
}

fn default_poll_interval() -> u64 {
    2_000
}

fn default_retry_after() -> u64 {
    5_000
}

fn default_stop_timeout() -> u64 {
    10
}

// ============================================================================
// LifecycleConfig
// ============================================================================

/// Settling delays around session teardown and startup.
///
/// These are conservative waits for the gateway's server-side session state
/// to expire. Shortening them makes 409 conflicts on restart more likely.
#[derive(Debug, Deserialize)]
pub struct LifecycleConfig {
    /// Wait between teardown and constructing the next session.
    #[serde(default = "default_settle_ms")]
    pub pre_start_delay_ms: u64,
    /// Wait between attaching handlers and the first poll.
    #[serde(default = "default_settle_ms")]
    pub pre_poll_delay_ms: u64,
    /// Wait after detaching handlers, before releasing the session.
    #[serde(default = "default_settle_ms")]
    pub settle_delay_ms: u64,
    /// Wait after releasing the session.
    #[serde(default = "default_settle_ms")]
    pub release_delay_ms: u64,
    /// Wait used instead when teardown itself fails.
    #[serde(default = "default_extended_ms")]
    pub failure_delay_ms: u64,
    /// Start is refused for this long after a conflict-triggered stop.
    #[serde(default = "default_extended_ms")]
    pub conflict_cooldown_ms: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            pre_start_delay_ms: default_settle_ms(),
            pre_poll_delay_ms: default_settle_ms(),
            settle_delay_ms: default_settle_ms(),
            release_delay_ms: default_settle_ms(),
            failure_delay_ms: default_extended_ms(),
            conflict_cooldown_ms: default_extended_ms(),
        }
    }
}

fn default_settle_ms() -> u64 {
    5_000
}

fn default_extended_ms() -> u64 {
    10_000
}

// ============================================================================
// BroadcastConfig
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct BroadcastConfig {
    #[serde(default = "default_broadcast_period")]
    pub period_seconds: u64,
    #[serde(default = "default_broadcast_message")]
    pub message: String,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            period_seconds: default_broadcast_period(),
            message: default_broadcast_message(),
        }
    }
}

fn default_broadcast_period() -> u64 {
    60
}

fn default_broadcast_message() -> String {
    "اذكر الله".to_string()
}

// ============================================================================
// CommandsConfig
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CommandsConfig {
    #[serde(default = "default_subscribe")]
    pub subscribe: String,
    #[serde(default = "default_unsubscribe")]
    pub unsubscribe: String,
    #[serde(default = "default_subscribed_reply")]
    pub subscribed_reply: String,
    #[serde(default = "default_unsubscribed_reply")]
    pub unsubscribed_reply: String,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            subscribe: default_subscribe(),
            unsubscribe: default_unsubscribe(),
            subscribed_reply: default_subscribed_reply(),
            unsubscribed_reply: default_unsubscribed_reply(),
        }
    }
}

fn default_subscribe() -> String {
    "/start".to_string()
}

fn default_unsubscribe() -> String {
    "/stop".to_string()
}

fn default_subscribed_reply() -> String {
    "تم تفعيل رسائل التذكير. ستصلك رسالة كل دقيقة إن شاء الله".to_string()
}

fn default_unsubscribed_reply() -> String {
    "تم إيقاف رسائل التذكير".to_string()
}

// ============================================================================
// ConfigError
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Yaml(#[from] serde_saphyr::Error),
}

// ============================================================================
// Tests
// ============================================================================
