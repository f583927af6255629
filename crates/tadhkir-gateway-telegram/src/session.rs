//! Telegram long-poll session.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tadhkir_gateway_protocol::{
    ChatId, DeliveryError, EventSender, GatewayConnector, GatewayError, GatewayEvent,
    GatewaySession, InboundMessage, PollOptions, TransportOptions,
};
use teloxide::Bot;
use teloxide::payloads::GetUpdatesSetters;
use teloxide::prelude::Requester;
use teloxide::requests::Request;
use teloxide::types::{AllowedUpdate, Update, UpdateKind};
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::{delivery_error, gateway_error, retry_delay};

// ============================================================================
// Connector
// ============================================================================

/// Telegram gateway configuration.
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
}

impl TelegramConfig {
    pub fn new(bot_token: impl Into<String>) -> Self {
        Self {
            bot_token: bot_token.into(),
        }
    }
}

/// Builds a fresh [`TelegramSession`] per call.
pub struct TelegramConnector {
    config: TelegramConfig,
}

impl TelegramConnector {
    pub fn new(config: TelegramConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl GatewayConnector for TelegramConnector {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn connect(
        &self,
        transport: &TransportOptions,
    ) -> Result<Arc<dyn GatewaySession>, GatewayError> {
        let mut builder = teloxide::net::default_reqwest_settings().timeout(transport.request_timeout);
        if transport.fresh_connection {
            // No idle connections are kept, so nothing outlives this session.
            builder = builder.pool_max_idle_per_host(0);
        }
        let client = builder
            .build()
            .map_err(|e| GatewayError::Transport(format!("failed to build http client: {e}")))?;

        let bot = Bot::with_client(self.config.bot_token.clone(), client);
        Ok(Arc::new(TelegramSession::new(bot)))
    }
}

// ============================================================================
// Session
// ============================================================================

struct Poller {
    cancel: CancellationToken,
    abort: AbortHandle,
    /// Taken by the first `stop_polling` call that waits on the loop.
    done: Option<JoinHandle<()>>,
}

/// One `getUpdates` poll loop plus the bot used to answer.
pub struct TelegramSession {
    bot: Bot,
    poller: Mutex<Option<Poller>>,
    polling: Arc<AtomicBool>,
    closed: AtomicBool,
}

impl TelegramSession {
    fn new(bot: Bot) -> Self {
        Self {
            bot,
            poller: Mutex::new(None),
            polling: Arc::new(AtomicBool::new(false)),
            closed: AtomicBool::new(false),
        }
    }

    fn poller(&self) -> MutexGuard<'_, Option<Poller>> {
        self.poller.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl GatewaySession for TelegramSession {
    async fn start_polling(
        &self,
        options: PollOptions,
        events: EventSender,
    ) -> Result<(), GatewayError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(GatewayError::Closed);
        }
        let mut slot = self.poller();
        if slot.is_some() {
            return Err(GatewayError::AlreadyPolling);
        }

        let cancel = CancellationToken::new();
        self.polling.store(true, Ordering::SeqCst);
        let task = tokio::spawn(poll_loop(
            self.bot.clone(),
            options,
            events,
            cancel.clone(),
            self.polling.clone(),
        ));
        *slot = Some(Poller {
            cancel,
            abort: task.abort_handle(),
            done: Some(task),
        });
        Ok(())
    }

    async fn stop_polling(&self, timeout: Duration) -> Result<(), GatewayError> {
        let done = {
            let mut slot = self.poller();
            let Some(poller) = slot.as_mut() else {
                return Ok(());
            };
            poller.cancel.cancel();
            poller.done.take()
        };

        let Some(done) = done else {
            // Another stop already waited on the loop.
            return if self.is_polling() {
                Err(GatewayError::StopTimeout(timeout))
            } else {
                Ok(())
            };
        };

        match tokio::time::timeout(timeout, done).await {
            Ok(_) => {
                self.poller().take();
                self.closed.store(true, Ordering::SeqCst);
                Ok(())
            }
            Err(_) => Err(GatewayError::StopTimeout(timeout)),
        }
    }

    fn abort(&self) -> Result<(), GatewayError> {
        if let Some(poller) = self.poller().take() {
            poller.cancel.cancel();
            poller.abort.abort();
        }
        self.polling.store(false, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_polling(&self) -> bool {
        self.polling.load(Ordering::SeqCst)
    }

    async fn send_message(&self, chat_id: &ChatId, text: &str) -> Result<(), DeliveryError> {
        let id: i64 = chat_id
            .as_str()
            .parse()
            .map_err(|_| DeliveryError::Other(format!("invalid telegram chat id: {chat_id}")))?;
        self.bot
            .send_message(teloxide::types::ChatId(id), text)
            .send()
            .await
            .map(|_| ())
            .map_err(delivery_error)
    }
}

// ============================================================================
// Poll loop
// ============================================================================

async fn poll_loop(
    bot: Bot,
    options: PollOptions,
    events: EventSender,
    cancel: CancellationToken,
    polling: Arc<AtomicBool>,
) {
    info!(
        timeout_secs = options.timeout.as_secs(),
        limit = options.limit,
        "Telegram polling started"
    );

    let timeout_secs = u32::try_from(options.timeout.as_secs()).unwrap_or(u32::MAX);
    let mut offset: i32 = 0;

    'poll: loop {
        let request = bot
            .get_updates()
            .offset(offset)
            .timeout(timeout_secs)
            .limit(options.limit)
            .allowed_updates([AllowedUpdate::Message]);

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => break 'poll,
            result = request.send() => result,
        };

        match result {
            Ok(updates) => {
                for update in updates {
                    offset = update.id.as_offset();
                    let Some(message) = inbound_message(update) else {
                        continue;
                    };
                    if events
                        .send(GatewayEvent::MessageReceived(message))
                        .await
                        .is_err()
                    {
                        debug!("Event receiver dropped, leaving poll loop");
                        break 'poll;
                    }
                }
            }
            Err(e) => {
                let delay = retry_delay(&e, options.retry_after);
                let err = gateway_error(e);
                warn!(error = %err, retry_in = ?delay, "Telegram poll failed");
                if events.send(GatewayEvent::Error(err)).await.is_err() {
                    break 'poll;
                }
                if !pause(&cancel, delay).await {
                    break 'poll;
                }
                continue;
            }
        }

        if !pause(&cancel, options.interval).await {
            break 'poll;
        }
    }

    // Confirm the processed offset so the next session starts after it.
    if cancel.is_cancelled() && offset != 0 {
        let ack = bot.get_updates().offset(offset).timeout(0).limit(1);
        if let Err(e) = ack.send().await {
            debug!(error = %e, "Failed to acknowledge final update offset");
        }
    }

    polling.store(false, Ordering::SeqCst);
    info!("Telegram polling stopped");
}

/// Sleep for `duration`; returns `false` if cancelled first.
async fn pause(cancel: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

fn inbound_message(update: Update) -> Option<InboundMessage> {
    let UpdateKind::Message(message) = update.kind else {
        return None;
    };
    let text = message.text()?.to_string();
    Some(InboundMessage {
        chat_id: ChatId::from(message.chat.id.0),
        text,
    })
}
