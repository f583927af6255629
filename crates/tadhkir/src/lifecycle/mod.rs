//! Lifecycle controller for the single gateway session.
//!
//! # State machine
//!
//! ```text
//!                 start()                      stop() / fatal error
//!   ┌──────┐ ───────────────────▶ ┌────────┐ ─────────────────────▶ ┌──────┐
//!   │ Idle │                      │ Active │                        │ Idle │
//!   └──────┘ ◀─── start failed ── └────────┘ ── 409 conflict ──────▶ └──────┘
//!                                     │                             + cooldown
//!                                     └── start(): cleanup, then fresh session
//! ```
//!
//! Every transition runs with the [`TransitionGuard`] held. A `start` or
//! `stop` arriving while another transition runs gets
//! [`LifecycleError::Busy`]; it is never queued.
//!
//! Transitions run on their own task, so a caller that goes away mid-way
//! (e.g. a dropped HTTP request) cannot leave teardown half done.

mod cleanup;
mod guard;

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tadhkir_gateway_protocol::{
    ChatId, ErrorSeverity, GatewayConnector, GatewayError, PollOptions, TransportOptions,
};
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::broadcast::{BroadcastSettings, BroadcastTask};
use crate::commands::{Command, CommandSet};
use crate::config::Config;
use crate::session::{SessionError, SessionEventHandler, SessionHandle, SessionSender};
use crate::subscribers::SubscriberRegistry;

pub use cleanup::{CleanupError, CleanupOutcome, CleanupSequencer, CleanupSettings};
pub use guard::{TransitionGuard, TransitionPermit};

// ============================================================================
// Public types
// ============================================================================

/// Everything the controller needs to know about timing and gateway options.
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub transport: TransportOptions,
    pub poll: PollOptions,
    pub cleanup: CleanupSettings,
    /// Wait between teardown and constructing the next session.
    pub pre_start_delay: Duration,
    /// Wait between attaching handlers and starting to poll.
    pub pre_poll_delay: Duration,
    /// Start is refused for this long after a conflict-triggered stop.
    pub conflict_cooldown: Duration,
    pub broadcast: BroadcastSettings,
    pub commands: CommandSet,
}

impl ControllerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            transport: config.gateway.transport_options(),
            poll: config.gateway.poll_options(),
            cleanup: CleanupSettings::from(config),
            pre_start_delay: Duration::from_millis(config.lifecycle.pre_start_delay_ms),
            pre_poll_delay: Duration::from_millis(config.lifecycle.pre_poll_delay_ms),
            conflict_cooldown: Duration::from_millis(config.lifecycle.conflict_cooldown_ms),
            broadcast: BroadcastSettings::from(&config.broadcast),
            commands: CommandSet::from(&config.commands),
        }
    }
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Idle,
    Active,
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Another start or stop is running. Retry later.
    #[error("a start or stop is already in progress")]
    Busy,

    /// A session conflict was recovered from recently.
    #[error("recovering from a session conflict, retry in {}s", .remaining.as_secs().max(1))]
    CoolingDown { remaining: Duration },

    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("session error: {0}")]
    Session(#[from] SessionError),

    #[error("lifecycle transition aborted: {0}")]
    Internal(String),
}

impl LifecycleError {
    /// Whether the same call may succeed if simply retried later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Busy | Self::CoolingDown { .. })
    }
}

/// Point-in-time view of the controller.
#[derive(Debug, Clone, Serialize)]
pub struct ControllerStatus {
    pub state: LifecycleState,
    pub busy: bool,
    pub session_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub subscribers: usize,
    /// Whether the broadcast loop is armed and running.
    pub broadcasting: bool,
    pub cooldown_remaining_ms: Option<u64>,
}

// ============================================================================
// LifecycleController
// ============================================================================

/// Owner of the single live gateway session.
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct LifecycleController {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    connector: Arc<dyn GatewayConnector>,
    registry: SubscriberRegistry,
    settings: ControllerSettings,
    cleanup: CleanupSequencer,
    guard: TransitionGuard,
    active: Arc<AtomicBool>,
    /// Never held across an await.
    live: Mutex<LiveSession>,
}

#[derive(Default)]
struct LiveSession {
    session: Option<SessionHandle>,
    broadcast: Option<BroadcastTask>,
    started_at: Option<DateTime<Utc>>,
    /// A conflict was reported and recovery has not run yet.
    conflict_pending: bool,
    cooldown_until: Option<Instant>,
}

impl LifecycleController {
    pub fn new(
        connector: Arc<dyn GatewayConnector>,
        registry: SubscriberRegistry,
        settings: ControllerSettings,
    ) -> Self {
        let cleanup = CleanupSequencer::new(settings.cleanup.clone());
        Self {
            inner: Arc::new(ControllerInner {
                connector,
                registry,
                settings,
                cleanup,
                guard: TransitionGuard::new(),
                active: Arc::new(AtomicBool::new(false)),
                live: Mutex::new(LiveSession::default()),
            }),
        }
    }

    /// Start a fresh session, tearing down any existing one first.
    ///
    /// On error the controller is idle: no session, no broadcast timer.
    pub async fn start(&self) -> Result<(), LifecycleError> {
        let permit = self
            .inner
            .guard
            .try_acquire()
            .ok_or(LifecycleError::Busy)?;
        if let Some(remaining) = self.inner.cooldown_remaining() {
            return Err(LifecycleError::CoolingDown { remaining });
        }

        let inner = self.inner.clone();
        run_transition(async move {
            let _permit = permit;
            inner.start_locked().await
        })
        .await
    }

    /// Tear down the current session, if any.
    pub async fn stop(&self) -> Result<(), LifecycleError> {
        let permit = self
            .inner
            .guard
            .try_acquire()
            .ok_or(LifecycleError::Busy)?;

        let inner = self.inner.clone();
        run_transition(async move {
            let _permit = permit;
            inner.teardown().await;
            info!("Lifecycle stopped");
            Ok(())
        })
        .await
    }

    /// Stop used by signal and fault handlers: waits out a running
    /// transition instead of being rejected.
    pub async fn shutdown(&self) {
        let inner = self.inner.clone();
        let _ = run_transition(async move {
            let Some(_permit) = inner.guard.acquire().await else {
                return Ok(());
            };
            inner.teardown().await;
            info!("Lifecycle shut down");
            Ok(())
        })
        .await;
    }

    pub fn state(&self) -> LifecycleState {
        if self.inner.active.load(Ordering::SeqCst) {
            LifecycleState::Active
        } else {
            LifecycleState::Idle
        }
    }

    pub fn is_busy(&self) -> bool {
        self.inner.guard.is_held()
    }

    pub fn registry(&self) -> &SubscriberRegistry {
        &self.inner.registry
    }

    pub fn status(&self) -> ControllerStatus {
        let (session_id, started_at, broadcasting) = {
            let live = self.inner.live();
            (
                live.session.as_ref().map(|s| s.id().to_string()),
                live.started_at,
                live.broadcast.as_ref().is_some_and(|b| !b.is_finished()),
            )
        };
        ControllerStatus {
            state: self.state(),
            busy: self.is_busy(),
            session_id,
            started_at,
            subscribers: self.inner.registry.len(),
            broadcasting,
            cooldown_remaining_ms: self.inner.cooldown_remaining().map(millis),
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

async fn run_transition<F>(transition: F) -> Result<(), LifecycleError>
where
    F: Future<Output = Result<(), LifecycleError>> + Send + 'static,
{
    tokio::spawn(transition).await.unwrap_or_else(|e| {
        error!(error = %e, "Lifecycle transition task failed");
        Err(LifecycleError::Internal(e.to_string()))
    })
}

// ============================================================================
// ControllerInner: transitions (guard held by caller)
// ============================================================================

impl ControllerInner {
    fn live(&self) -> MutexGuard<'_, LiveSession> {
        self.live.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn cooldown_remaining(&self) -> Option<Duration> {
        let live = self.live();
        if live.conflict_pending {
            return Some(self.settings.conflict_cooldown);
        }
        let until = live.cooldown_until?;
        let remaining = until.saturating_duration_since(Instant::now());
        (!remaining.is_zero()).then_some(remaining)
    }

    fn live_session_id(&self) -> Option<String> {
        self.live().session.as_ref().map(|s| s.id().to_string())
    }

    async fn start_locked(self: &Arc<Self>) -> Result<(), LifecycleError> {
        if self.active.load(Ordering::SeqCst) {
            info!("Session already active, restarting");
        }

        self.teardown().await;
        tokio::time::sleep(self.settings.pre_start_delay).await;

        // A conflict reported while the old session was torn down.
        if let Some(remaining) = self.cooldown_remaining() {
            warn!(
                remaining_ms = millis(remaining),
                "Session conflict during restart, not starting"
            );
            return Err(LifecycleError::CoolingDown { remaining });
        }

        match self.launch().await {
            Ok(session_id) => {
                info!(session = %session_id, gateway = self.connector.name(), "Lifecycle started");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Failed to start gateway session");
                self.active.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    /// Construct, wire and start a new session. Returns its id.
    async fn launch(self: &Arc<Self>) -> Result<String, LifecycleError> {
        let gateway = self.connector.connect(&self.settings.transport).await?;
        let mut session = SessionHandle::new(gateway, self.settings.commands.clone());
        session.attach_handlers(Arc::new(ControllerEvents {
            controller: Arc::downgrade(self),
            registry: self.registry.clone(),
            commands: self.settings.commands.clone(),
        }))?;

        tokio::time::sleep(self.settings.pre_poll_delay).await;

        if let Err(e) = session.start_polling(self.settings.poll.clone()).await {
            self.cleanup.run(&self.active, None, Some(session)).await;
            return Err(e.into());
        }

        self.active.store(true, Ordering::SeqCst);
        let broadcast = BroadcastTask::arm(
            self.settings.broadcast.clone(),
            self.registry.clone(),
            session.sender(),
            self.active.clone(),
            CancellationToken::new(),
        );

        let session_id = session.id().to_string();
        let mut live = self.live();
        live.session = Some(session);
        live.broadcast = Some(broadcast);
        live.started_at = Some(Utc::now());
        Ok(session_id)
    }

    /// Detach the live session and broadcast timer and run the cleanup
    /// sequence on them.
    async fn teardown(&self) -> CleanupOutcome {
        let (session, broadcast) = {
            let mut live = self.live();
            live.started_at = None;
            (live.session.take(), live.broadcast.take())
        };
        self.cleanup.run(&self.active, broadcast, session).await
    }

    /// Block `start` until recovery from a reported conflict has run.
    fn mark_conflict(&self) {
        self.live().conflict_pending = true;
    }

    /// Block `start` for the conflict cooldown, counted from now.
    fn begin_cooldown(&self) {
        let mut live = self.live();
        live.conflict_pending = false;
        live.cooldown_until = Some(Instant::now() + self.settings.conflict_cooldown);
    }

    /// Stop after an asynchronous session error, if that session is still
    /// the live one. A conflict restarts the cooldown once teardown is done,
    /// whoever tore the session down.
    async fn recover(self: Arc<Self>, session_id: String, severity: ErrorSeverity) {
        let Some(_permit) = self.guard.acquire().await else {
            return;
        };

        if self.live_session_id().as_deref() == Some(session_id.as_str()) {
            self.teardown().await;
        } else {
            debug!(session = %session_id, "Session already torn down");
        }

        if severity == ErrorSeverity::Conflict {
            self.begin_cooldown();
            warn!(
                session = %session_id,
                cooldown_ms = millis(self.settings.conflict_cooldown),
                "Stopped after session conflict, start is blocked during cooldown"
            );
        } else {
            warn!(session = %session_id, "Stopped after fatal gateway error");
        }
    }
}

// ============================================================================
// Session event handlers
// ============================================================================

struct ControllerEvents {
    controller: Weak<ControllerInner>,
    registry: SubscriberRegistry,
    commands: CommandSet,
}

impl ControllerEvents {
    async fn acknowledge(&self, sender: &SessionSender, chat_id: &ChatId, command: Command) {
        if let Err(e) = sender.send(chat_id, self.commands.reply(command)).await {
            warn!(chat_id = %chat_id, error = %e, "Failed to send command acknowledgement");
        }
    }
}

#[async_trait]
impl SessionEventHandler for ControllerEvents {
    async fn on_subscribe(&self, chat_id: ChatId, sender: &SessionSender) {
        let added = self.registry.add(chat_id.clone());
        info!(chat_id = %chat_id, added, "Subscribe command");
        self.acknowledge(sender, &chat_id, Command::Subscribe).await;
    }

    async fn on_unsubscribe(&self, chat_id: ChatId, sender: &SessionSender) {
        let removed = self.registry.remove(&chat_id);
        info!(chat_id = %chat_id, removed, "Unsubscribe command");
        self.acknowledge(sender, &chat_id, Command::Unsubscribe).await;
    }

    async fn on_error(&self, session_id: &str, error: GatewayError) {
        let severity = error.severity();
        match severity {
            ErrorSeverity::Transient => {
                warn!(session = %session_id, error = %error, "Gateway error");
                return;
            }
            ErrorSeverity::Fatal => {
                error!(session = %session_id, error = %error, "Fatal gateway error, stopping");
            }
            ErrorSeverity::Conflict => {
                warn!(session = %session_id, error = %error, "Session conflict, stopping");
            }
        }

        let Some(controller) = self.controller.upgrade() else {
            return;
        };
        if severity == ErrorSeverity::Conflict {
            // Visible to `start` before recovery gets the guard.
            controller.mark_conflict();
        }
        tokio::spawn(controller.recover(session_id.to_string(), severity));
    }
}
