//! Periodic reminder broadcast to all subscribers.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::future::join_all;
use tadhkir_gateway_protocol::ChatId;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::BroadcastConfig;
use crate::session::SessionSender;
use crate::subscribers::SubscriberRegistry;

/// Floor for the tick period; a zero period would spin.
const MIN_PERIOD: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastSettings {
    pub period: Duration,
    pub message: String,
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self::from(&BroadcastConfig::default())
    }
}

impl From<&BroadcastConfig> for BroadcastSettings {
    fn from(config: &BroadcastConfig) -> Self {
        Self {
            period: Duration::from_secs(config.period_seconds),
            message: config.message.clone(),
        }
    }
}

/// Outcome of one broadcast pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub delivered: usize,
    /// Unreachable subscribers removed from the registry.
    pub pruned: Vec<ChatId>,
    /// Failures kept for the next tick.
    pub failed: usize,
}

/// Send `message` to every current subscriber.
///
/// Sends run concurrently and fail independently. Unreachable recipients are
/// removed from `registry`; other failures are logged and retried next tick.
pub async fn broadcast_tick(
    registry: &SubscriberRegistry,
    sender: &SessionSender,
    message: &str,
) -> TickReport {
    let members = registry.snapshot();
    let results = join_all(members.into_iter().map(|chat_id| async move {
        let result = sender.send(&chat_id, message).await;
        (chat_id, result)
    }))
    .await;

    let mut report = TickReport::default();
    for (chat_id, result) in results {
        match result {
            Ok(()) => report.delivered += 1,
            Err(e) if e.is_unreachable() => {
                info!(chat_id = %chat_id, error = %e, "Removing unreachable subscriber");
                registry.remove(&chat_id);
                report.pruned.push(chat_id);
            }
            Err(e) => {
                warn!(chat_id = %chat_id, error = %e, "Failed to send reminder");
                report.failed += 1;
            }
        }
    }
    report
}

/// A running broadcast loop.
///
/// The loop checks both its token and the lifecycle's active flag at the top
/// of every tick, so a stop that lands between ticks is always observed.
pub struct BroadcastTask {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl BroadcastTask {
    /// Spawn the loop. The first tick fires one period after arming.
    pub fn arm(
        settings: BroadcastSettings,
        registry: SubscriberRegistry,
        sender: SessionSender,
        active: Arc<AtomicBool>,
        cancel: CancellationToken,
    ) -> Self {
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            let period = settings.period.max(MIN_PERIOD);
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {}
                }
                if !active.load(Ordering::SeqCst) {
                    debug!("Lifecycle no longer active, broadcast loop exiting");
                    break;
                }

                let report = broadcast_tick(&registry, &sender, &settings.message).await;
                debug!(
                    delivered = report.delivered,
                    pruned = report.pruned.len(),
                    failed = report.failed,
                    "Broadcast tick complete"
                );
            }
            debug!("Broadcast loop stopped");
        });
        Self { cancel, task }
    }

    /// Disarm the loop. A tick already sending finishes its sends; no new
    /// tick starts.
    pub fn cancel(self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
