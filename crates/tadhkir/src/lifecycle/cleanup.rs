//! Forced teardown of a gateway session.
//!
//! Two long-poll sessions alive at once for the same bot token make the
//! gateway reject both with 409. Teardown therefore does not end when the poll
//! loop exits: it waits out settling delays so the gateway's server-side
//! session has expired before a replacement is allowed to start.
//!
//! ```text
//!  1. mark inactive, cancel broadcast timer
//!  2. stop_polling(timeout) ──fail/timeout──▶ abort()
//!  3. detach handlers
//!  4. wait settle_delay
//!  5. release handle, wait release_delay
//!  6. on failure in 2–4: log, wait failure_delay instead
//! ```

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::FutureExt;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::broadcast::BroadcastTask;
use crate::config::Config;
use crate::session::{SessionError, SessionHandle};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupSettings {
    /// Bound on the graceful stop before falling back to abort.
    pub stop_timeout: Duration,
    pub settle_delay: Duration,
    pub release_delay: Duration,
    pub failure_delay: Duration,
}

impl Default for CleanupSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for CleanupSettings {
    fn from(config: &Config) -> Self {
        Self {
            stop_timeout: config.gateway.stop_timeout(),
            settle_delay: Duration::from_millis(config.lifecycle.settle_delay_ms),
            release_delay: Duration::from_millis(config.lifecycle.release_delay_ms),
            failure_delay: Duration::from_millis(config.lifecycle.failure_delay_ms),
        }
    }
}

#[derive(Debug, Error)]
pub enum CleanupError {
    #[error("failed to abort session transport: {0}")]
    Abort(#[source] SessionError),

    #[error("session teardown panicked")]
    Panicked,
}

/// What a cleanup run did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupOutcome {
    /// There was no session to tear down.
    NoSession,
    /// Session torn down and settling delays elapsed.
    Clean,
    /// Teardown failed; the failure delay elapsed instead.
    Failed,
}

#[derive(Debug, Clone)]
pub struct CleanupSequencer {
    settings: CleanupSettings,
}

impl CleanupSequencer {
    pub fn new(settings: CleanupSettings) -> Self {
        Self { settings }
    }

    /// Run the full sequence. Never fails; safe with nothing to clean up.
    pub async fn run(
        &self,
        active: &AtomicBool,
        broadcast: Option<BroadcastTask>,
        session: Option<SessionHandle>,
    ) -> CleanupOutcome {
        active.store(false, Ordering::SeqCst);
        if let Some(broadcast) = broadcast {
            broadcast.cancel();
            debug!("Broadcast timer cancelled");
        }

        let Some(mut session) = session else {
            return CleanupOutcome::NoSession;
        };
        let session_id = session.id().to_string();
        info!(session = %session_id, "Tearing down gateway session");

        let result = AssertUnwindSafe(self.teardown(&mut session))
            .catch_unwind()
            .await
            .unwrap_or(Err(CleanupError::Panicked));

        match result {
            Ok(()) => {
                session.release();
                tokio::time::sleep(self.settings.release_delay).await;
                info!(session = %session_id, "Gateway session torn down");
                CleanupOutcome::Clean
            }
            Err(e) => {
                error!(session = %session_id, error = %e, "Session teardown failed");
                session.release();
                tokio::time::sleep(self.settings.failure_delay).await;
                CleanupOutcome::Failed
            }
        }
    }

    async fn teardown(&self, session: &mut SessionHandle) -> Result<(), CleanupError> {
        match session.stop_polling(self.settings.stop_timeout).await {
            Ok(()) if !session.is_polling() => {
                debug!(session = %session.id(), "Polling stopped gracefully");
            }
            Ok(()) => {
                warn!(session = %session.id(), "Session still polling after stop, aborting");
                session.abort().map_err(CleanupError::Abort)?;
            }
            Err(e) => {
                warn!(session = %session.id(), error = %e, "Graceful stop failed, aborting");
                session.abort().map_err(CleanupError::Abort)?;
            }
        }

        session.detach_all_handlers();
        tokio::time::sleep(self.settings.settle_delay).await;
        Ok(())
    }
}
