//! Session handle: one gateway session plus the task dispatching its events.
//!
//! ```text
//!  GatewaySession ──GatewayEvent──▶ mpsc ──▶ dispatcher task
//!                                              ├─ subscribe token   → on_subscribe
//!                                              ├─ unsubscribe token → on_unsubscribe
//!                                              └─ Error             → on_error
//! ```
//!
//! A handle is single-use. [`SessionHandle::release`] consumes it, so a torn
//! down session cannot be started again; the next session always gets a new
//! handle.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tadhkir_gateway_protocol::{
    ChatId, DeliveryError, EVENT_CHANNEL_CAPACITY, EventReceiver, EventSender, GatewayError,
    GatewayEvent, GatewaySession, PollOptions,
};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::commands::{Command, CommandSet};

// ============================================================================
// Public types
// ============================================================================

/// Callbacks invoked by the dispatcher task.
#[async_trait]
pub trait SessionEventHandler: Send + Sync {
    async fn on_subscribe(&self, chat_id: ChatId, sender: &SessionSender);

    async fn on_unsubscribe(&self, chat_id: ChatId, sender: &SessionSender);

    /// Must return promptly; anything that tears the session down has to run
    /// on its own task, since teardown stops this dispatcher.
    async fn on_error(&self, session_id: &str, error: GatewayError);
}

/// Cheap cloneable handle for sending through a session.
#[derive(Clone)]
pub struct SessionSender {
    session: Arc<dyn GatewaySession>,
}

impl SessionSender {
    pub async fn send(&self, chat_id: &ChatId, text: &str) -> Result<(), DeliveryError> {
        self.session.send_message(chat_id, text).await
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("event handlers were already attached to this session")]
    HandlersAttached,

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

// ============================================================================
// SessionHandle
// ============================================================================

pub struct SessionHandle {
    id: String,
    session: Arc<dyn GatewaySession>,
    commands: CommandSet,
    events_tx: EventSender,
    events_rx: Option<EventReceiver>,
    dispatcher: Option<JoinHandle<()>>,
}

impl SessionHandle {
    pub fn new(session: Arc<dyn GatewaySession>, commands: CommandSet) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            id: ulid::Ulid::new().to_string().to_lowercase(),
            session,
            commands,
            events_tx,
            events_rx: Some(events_rx),
            dispatcher: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn sender(&self) -> SessionSender {
        SessionSender {
            session: self.session.clone(),
        }
    }

    pub fn is_polling(&self) -> bool {
        self.session.is_polling()
    }

    pub fn has_handlers(&self) -> bool {
        self.dispatcher.is_some()
    }

    /// Spawn the dispatcher routing this session's events to `handler`.
    ///
    /// Handlers can be attached once per session.
    pub fn attach_handlers(
        &mut self,
        handler: Arc<dyn SessionEventHandler>,
    ) -> Result<(), SessionError> {
        let events = self
            .events_rx
            .take()
            .ok_or(SessionError::HandlersAttached)?;
        self.dispatcher = Some(tokio::spawn(dispatch(
            self.id.clone(),
            events,
            self.commands.clone(),
            self.sender(),
            handler,
        )));
        Ok(())
    }

    pub async fn start_polling(&self, options: PollOptions) -> Result<(), SessionError> {
        self.session
            .start_polling(options, self.events_tx.clone())
            .await?;
        Ok(())
    }

    /// Ask the poll loop to stop and wait up to `timeout` for it to exit.
    pub async fn stop_polling(&self, timeout: Duration) -> Result<(), SessionError> {
        self.session.stop_polling(timeout).await?;
        Ok(())
    }

    /// Sever the transport whatever state the poll loop is in.
    pub fn abort(&self) -> Result<(), SessionError> {
        self.session.abort()?;
        Ok(())
    }

    /// Stop the dispatcher. No handler runs for this session afterwards.
    pub fn detach_all_handlers(&mut self) {
        if let Some(dispatcher) = self.dispatcher.take() {
            dispatcher.abort();
            debug!(session = %self.id, "Detached session handlers");
        }
        // Dropping the receiver makes further gateway events fail fast.
        self.events_rx = None;
    }

    /// Tear the handle down for good.
    pub fn release(mut self) {
        self.detach_all_handlers();
        debug!(session = %self.id, "Released session");
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        if let Some(dispatcher) = self.dispatcher.take() {
            dispatcher.abort();
        }
    }
}

async fn dispatch(
    session_id: String,
    mut events: EventReceiver,
    commands: CommandSet,
    sender: SessionSender,
    handler: Arc<dyn SessionEventHandler>,
) {
    while let Some(event) = events.recv().await {
        match event {
            GatewayEvent::MessageReceived(message) => match commands.parse(&message.text) {
                Some(Command::Subscribe) => handler.on_subscribe(message.chat_id, &sender).await,
                Some(Command::Unsubscribe) => {
                    handler.on_unsubscribe(message.chat_id, &sender).await
                }
                None => {
                    debug!(session = %session_id, chat_id = %message.chat_id, "Ignoring non-command message")
                }
            },
            GatewayEvent::Error(error) => handler.on_error(&session_id, error).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tadhkir_gateway_protocol::InboundMessage;

    #[derive(Default)]
    struct StubSession {
        polling: AtomicBool,
        events: Mutex<Option<EventSender>>,
    }

    #[async_trait]
    impl GatewaySession for StubSession {
        async fn start_polling(
            &self,
            _options: PollOptions,
            events: EventSender,
        ) -> Result<(), GatewayError> {
            if self.polling.swap(true, Ordering::SeqCst) {
                return Err(GatewayError::AlreadyPolling);
            }
            *self.events.lock().unwrap() = Some(events);
            Ok(())
        }

        async fn stop_polling(&self, _timeout: Duration) -> Result<(), GatewayError> {
            self.polling.store(false, Ordering::SeqCst);
            Ok(())
        }

        fn abort(&self) -> Result<(), GatewayError> {
            self.polling.store(false, Ordering::SeqCst);
            Ok(())
        }

        fn is_polling(&self) -> bool {
            self.polling.load(Ordering::SeqCst)
        }

        async fn send_message(&self, _chat_id: &ChatId, _text: &str) -> Result<(), DeliveryError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SessionEventHandler for Recorder {
        async fn on_subscribe(&self, chat_id: ChatId, _sender: &SessionSender) {
            self.calls.lock().unwrap().push(format!("subscribe:{chat_id}"));
        }

        async fn on_unsubscribe(&self, chat_id: ChatId, _sender: &SessionSender) {
            self.calls.lock().unwrap().push(format!("unsubscribe:{chat_id}"));
        }

        async fn on_error(&self, _session_id: &str, error: GatewayError) {
            self.calls.lock().unwrap().push(format!("error:{:?}", error.status()));
        }
    }

    fn message(chat: i64, text: &str) -> GatewayEvent {
        GatewayEvent::MessageReceived(InboundMessage {
            chat_id: ChatId::from(chat),
            text: text.to_string(),
        })
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn dispatches_commands_and_errors() {
        let stub = Arc::new(StubSession::default());
        let recorder = Arc::new(Recorder::default());
        let mut handle = SessionHandle::new(stub.clone(), CommandSet::default());
        handle.attach_handlers(recorder.clone()).unwrap();
        handle.start_polling(PollOptions::default()).await.unwrap();

        let events = stub.events.lock().unwrap().clone().unwrap();
        events.send(message(1, "/start")).await.unwrap();
        events.send(message(1, "hello")).await.unwrap();
        events.send(message(2, "/stop")).await.unwrap();
        events
            .send(GatewayEvent::Error(GatewayError::conflict("conflict")))
            .await
            .unwrap();
        settle().await;

        let calls = recorder.calls.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec!["subscribe:1", "unsubscribe:2", "error:Some(409)"]
        );
    }

    #[tokio::test]
    async fn handlers_attach_once() {
        let stub = Arc::new(StubSession::default());
        let mut handle = SessionHandle::new(stub, CommandSet::default());
        handle.attach_handlers(Arc::new(Recorder::default())).unwrap();
        assert!(matches!(
            handle.attach_handlers(Arc::new(Recorder::default())),
            Err(SessionError::HandlersAttached)
        ));
    }

    #[tokio::test]
    async fn detached_handlers_see_no_events() {
        let stub = Arc::new(StubSession::default());
        let recorder = Arc::new(Recorder::default());
        let mut handle = SessionHandle::new(stub.clone(), CommandSet::default());
        handle.attach_handlers(recorder.clone()).unwrap();
        handle.start_polling(PollOptions::default()).await.unwrap();
        let events = stub.events.lock().unwrap().clone().unwrap();

        handle.detach_all_handlers();
        assert!(!handle.has_handlers());
        settle().await;

        let _ = events.send(message(1, "/start")).await;
        settle().await;
        assert!(recorder.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn start_polling_twice_fails() {
        let stub = Arc::new(StubSession::default());
        let handle = SessionHandle::new(stub, CommandSet::default());
        handle.start_polling(PollOptions::default()).await.unwrap();
        assert!(handle.is_polling());
        assert!(matches!(
            handle.start_polling(PollOptions::default()).await,
            Err(SessionError::Gateway(GatewayError::AlreadyPolling))
        ));
        handle.stop_polling(Duration::from_secs(1)).await.unwrap();
        assert!(!handle.is_polling());
    }

    #[tokio::test]
    async fn every_handle_gets_its_own_id() {
        let stub = Arc::new(StubSession::default());
        let first = SessionHandle::new(stub.clone(), CommandSet::default());
        let second = SessionHandle::new(stub, CommandSet::default());
        assert_ne!(first.id(), second.id());
        assert_eq!(first.id().len(), 26);
    }
}
