//! Last line of defence: a panic anywhere in the process stops the session.
//!
//! A panicking task would otherwise leave the gateway session polling with
//! nobody watching it. The panic hook forwards every panic to a supervisor
//! task, which shuts the lifecycle down.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::error;

use crate::lifecycle::LifecycleController;

pub type FaultSender = mpsc::UnboundedSender<String>;
pub type FaultReceiver = mpsc::UnboundedReceiver<String>;

pub fn fault_channel() -> (FaultSender, FaultReceiver) {
    mpsc::unbounded_channel()
}

/// Chain a panic hook that reports each panic on `faults`.
///
/// The previously installed hook still runs first.
pub fn install_panic_hook(faults: FaultSender) {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        previous(info);
        let _ = faults.send(info.to_string());
    }));
}

/// Shut the lifecycle down for every reported fault.
pub fn spawn_fault_supervisor(
    controller: LifecycleController,
    mut faults: FaultReceiver,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(fault) = faults.recv().await {
            error!(fault = %fault, "Unhandled fault, stopping gateway session");
            controller.shutdown().await;
        }
    })
}
