//! In-memory gateway used by the integration tests.
//!
//! Every call made against a mock session is appended to a shared journal
//! together with the (paused) clock reading, so tests can assert ordering and
//! the settling delays between calls.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use tadhkir::gateway::{
    ChatId, DeliveryError, EventSender, GatewayConnector, GatewayError, GatewayEvent,
    GatewaySession, InboundMessage, PollOptions, TransportOptions,
};
use tadhkir::{ControllerSettings, LifecycleController, LifecycleState, SubscriberRegistry};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Connect(usize),
    StartPolling(usize),
    StopPolling(usize),
    Abort(usize),
    Send {
        session: usize,
        chat_id: String,
        text: String,
    },
}

#[derive(Debug, Clone)]
pub struct Entry {
    pub at: Instant,
    pub call: Call,
}

/// State shared by the connector and every session it builds.
#[derive(Default)]
pub struct Shared {
    journal: Mutex<Vec<Entry>>,
    unreachable: Mutex<HashSet<ChatId>>,
    failing: Mutex<HashSet<ChatId>>,
    polling_now: AtomicUsize,
    overlapped: AtomicBool,
    fail_start_polling: AtomicBool,
    stop_times_out: AtomicBool,
    stop_panics: AtomicBool,
    abort_fails: AtomicBool,
}

impl Shared {
    fn record(&self, call: Call) {
        self.journal.lock().unwrap().push(Entry {
            at: Instant::now(),
            call,
        });
    }

    pub fn stop_times_out(&self, hang: bool) {
        self.stop_times_out.store(hang, Ordering::SeqCst);
    }

    pub fn stop_panics(&self, panics: bool) {
        self.stop_panics.store(panics, Ordering::SeqCst);
    }

    pub fn abort_fails(&self, fails: bool) {
        self.abort_fails.store(fails, Ordering::SeqCst);
    }

    pub fn mark_unreachable(&self, chat_id: &str) {
        self.unreachable.lock().unwrap().insert(ChatId::from(chat_id));
    }

    pub fn mark_failing(&self, chat_id: &str) {
        self.failing.lock().unwrap().insert(ChatId::from(chat_id));
    }

    /// Number of `send_message` calls so far.
    pub fn sends(&self) -> usize {
        self.journal
            .lock()
            .unwrap()
            .iter()
            .filter(|e| matches!(e.call, Call::Send { .. }))
            .count()
    }
}

// ============================================================================
// MockSession
// ============================================================================

pub struct MockSession {
    index: usize,
    shared: Arc<Shared>,
    polling: AtomicBool,
    events: Mutex<Option<EventSender>>,
}

impl MockSession {
    pub fn standalone() -> Arc<Self> {
        Arc::new(Self::new(0, Arc::new(Shared::default())))
    }

    fn new(index: usize, shared: Arc<Shared>) -> Self {
        Self {
            index,
            shared,
            polling: AtomicBool::new(false),
            events: Mutex::new(None),
        }
    }

    pub fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    /// Push an event as if the poll loop had produced it.
    pub async fn emit(&self, event: GatewayEvent) {
        let sender = self.events.lock().unwrap().clone();
        if let Some(sender) = sender {
            let _ = sender.send(event).await;
        }
    }

    pub async fn emit_text(&self, chat_id: &str, text: &str) {
        self.emit(GatewayEvent::MessageReceived(InboundMessage {
            chat_id: ChatId::from(chat_id),
            text: text.to_string(),
        }))
        .await;
    }

    pub async fn emit_error(&self, error: GatewayError) {
        self.emit(GatewayEvent::Error(error)).await;
    }

    fn stop_loop(&self) {
        if self.polling.swap(false, Ordering::SeqCst) {
            self.shared.polling_now.fetch_sub(1, Ordering::SeqCst);
        }
        self.events.lock().unwrap().take();
    }
}

#[async_trait]
impl GatewaySession for MockSession {
    async fn start_polling(
        &self,
        _options: PollOptions,
        events: EventSender,
    ) -> Result<(), GatewayError> {
        self.shared.record(Call::StartPolling(self.index));
        if self.shared.fail_start_polling.load(Ordering::SeqCst) {
            return Err(GatewayError::api(401, "Unauthorized"));
        }
        if self.polling.swap(true, Ordering::SeqCst) {
            return Err(GatewayError::AlreadyPolling);
        }
        if self.shared.polling_now.fetch_add(1, Ordering::SeqCst) > 0 {
            self.shared.overlapped.store(true, Ordering::SeqCst);
        }
        *self.events.lock().unwrap() = Some(events);
        Ok(())
    }

    async fn stop_polling(&self, timeout: Duration) -> Result<(), GatewayError> {
        self.shared.record(Call::StopPolling(self.index));
        if self.shared.stop_panics.load(Ordering::SeqCst) {
            panic!("stop_polling blew up");
        }
        if self.shared.stop_times_out.load(Ordering::SeqCst) {
            tokio::time::sleep(timeout).await;
            return Err(GatewayError::StopTimeout(timeout));
        }
        self.stop_loop();
        Ok(())
    }

    fn abort(&self) -> Result<(), GatewayError> {
        self.shared.record(Call::Abort(self.index));
        if self.shared.abort_fails.load(Ordering::SeqCst) {
            return Err(GatewayError::Transport("transport already gone".into()));
        }
        self.stop_loop();
        Ok(())
    }

    fn is_polling(&self) -> bool {
        self.polling.load(Ordering::SeqCst)
    }

    async fn send_message(&self, chat_id: &ChatId, text: &str) -> Result<(), DeliveryError> {
        self.shared.record(Call::Send {
            session: self.index,
            chat_id: chat_id.to_string(),
            text: text.to_string(),
        });
        if self.shared.unreachable.lock().unwrap().contains(chat_id) {
            return Err(DeliveryError::Unreachable("Forbidden: bot was blocked by the user".into()));
        }
        if self.shared.failing.lock().unwrap().contains(chat_id) {
            return Err(DeliveryError::Other("Too Many Requests".into()));
        }
        Ok(())
    }
}

// ============================================================================
// MockConnector
// ============================================================================

#[derive(Default)]
pub struct MockConnector {
    shared: Arc<Shared>,
    sessions: Mutex<Vec<Arc<MockSession>>>,
    fail_connect: AtomicBool,
}

impl MockConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn fail_start_polling(&self, fail: bool) {
        self.shared.fail_start_polling.store(fail, Ordering::SeqCst);
    }

    pub fn stop_times_out(&self, hang: bool) {
        self.shared.stop_times_out(hang);
    }

    pub fn stop_panics(&self, panics: bool) {
        self.shared.stop_panics(panics);
    }

    pub fn abort_fails(&self, fails: bool) {
        self.shared.abort_fails(fails);
    }

    pub fn session(&self, index: usize) -> Arc<MockSession> {
        self.sessions.lock().unwrap()[index].clone()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn latest(&self) -> Arc<MockSession> {
        self.sessions
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no session was connected")
    }

    pub fn polling_now(&self) -> usize {
        self.shared.polling_now.load(Ordering::SeqCst)
    }

    /// Whether two sessions were ever polling at the same moment.
    pub fn overlapped(&self) -> bool {
        self.shared.overlapped.load(Ordering::SeqCst)
    }

    pub fn mark_unreachable(&self, chat_id: &str) {
        self.shared.mark_unreachable(chat_id);
    }

    pub fn mark_failing(&self, chat_id: &str) {
        self.shared.mark_failing(chat_id);
    }

    pub fn journal(&self) -> Vec<Entry> {
        self.shared.journal.lock().unwrap().clone()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.journal().into_iter().map(|e| e.call).collect()
    }

    /// Clock reading of the first journal entry equal to `call`.
    pub fn time_of(&self, call: &Call) -> Instant {
        self.journal()
            .into_iter()
            .find(|e| &e.call == call)
            .map(|e| e.at)
            .unwrap_or_else(|| panic!("{call:?} not in journal"))
    }

    /// Texts sent to `chat_id`, in order.
    pub fn sent_to(&self, chat_id: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Send {
                    chat_id: to, text, ..
                } if to == chat_id => Some(text),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl GatewayConnector for MockConnector {
    fn name(&self) -> &str {
        "mock"
    }

    async fn connect(
        &self,
        _transport: &TransportOptions,
    ) -> Result<Arc<dyn GatewaySession>, GatewayError> {
        let mut sessions = self.sessions.lock().unwrap();
        let index = sessions.len();
        self.shared.record(Call::Connect(index));
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(GatewayError::Transport("connection refused".into()));
        }
        let session = Arc::new(MockSession::new(index, self.shared.clone()));
        sessions.push(session.clone());
        Ok(session)
    }
}

// ============================================================================
// Helpers
// ============================================================================

pub fn controller(connector: &Arc<MockConnector>) -> LifecycleController {
    LifecycleController::new(
        connector.clone(),
        SubscriberRegistry::new(),
        ControllerSettings::default(),
    )
}

/// Wait until `check` holds, polling on the paused clock.
pub async fn wait_until(mut check: impl FnMut() -> bool) {
    for _ in 0..10_000 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

/// Wait until the controller settled back to idle with no transition running.
pub async fn wait_idle(controller: &LifecycleController) {
    wait_until(|| !controller.is_busy() && controller.state() == LifecycleState::Idle).await;
}
