//! Protocol framing between the client and the transport.
//!
//! [`ServiceManager`] builds every outbound message (with a fresh event id)
//! and owns the [`EventQueue`] that turns inbound frames into typed events.

pub mod connection;
pub mod diagnostics;

pub use connection::{ConnectionHandler, ReconnectPolicy, Transport, WebSocketConnection};
pub use diagnostics::{DiagnosticsSnapshot, ServiceDiagnostics};

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, Notify};
use tracing::{debug, error, info, warn};

use crate::error::{RealtimeError, Result};
use crate::protocol::inbound::{parse_frame, ErrorEvent, Event};
use crate::protocol::outbound::{ClientEvent, OutboundItem, OutboundMessage, ResponseParams};
use crate::protocol::session::{Modality, SessionOptions};
use crate::status::{SessionStatus, SessionStatusEvent};

/// Default bounded wait of [`ServiceManager::get_next_event`].
pub const EVENT_POLL_TIMEOUT: Duration = Duration::from_millis(100);

const STATUS_CHANNEL_CAPACITY: usize = 64;

/// Inbound router: parses frames and buffers events in arrival order.
pub struct EventQueue {
    events: Mutex<VecDeque<Event>>,
    notify: Notify,
    diagnostics: Arc<ServiceDiagnostics>,
    status_tx: broadcast::Sender<SessionStatusEvent>,
}

impl EventQueue {
    fn new(diagnostics: Arc<ServiceDiagnostics>, status_tx: broadcast::Sender<SessionStatusEvent>) -> Self {
        Self {
            events: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            diagnostics,
            status_tx,
        }
    }

    pub fn push(&self, event: Event) {
        self.events.lock().push_back(event);
        self.notify.notify_one();
    }

    /// Pop the oldest event, waiting at most `timeout`.
    pub async fn pop(&self, timeout: Duration) -> Option<Event> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            if let Some(event) = self.events.lock().pop_front() {
                return Some(event);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.events.lock().pop_front();
            }
        }
    }

    /// Drop everything queued. Returns how many events were discarded.
    pub fn clear(&self) -> usize {
        let dropped = {
            let mut events = self.events.lock();
            let n = events.len();
            events.clear();
            n
        };
        self.diagnostics
            .events_cleared
            .fetch_add(dropped, std::sync::atomic::Ordering::Relaxed);
        dropped
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    fn publish(&self, status: SessionStatus, detail: Option<String>) {
        let _ = self.status_tx.send(SessionStatusEvent { status, detail });
    }
}

impl ConnectionHandler for EventQueue {
    fn on_connected(&self, reconnecting: bool) {
        if reconnecting {
            ServiceDiagnostics::bump(&self.diagnostics.reconnects);
            info!("reconnected to realtime service");
        }
        self.publish(SessionStatus::Connected, None);
    }

    fn on_message_received(&self, raw: &str) {
        ServiceDiagnostics::bump(&self.diagnostics.frames_received);
        match parse_frame(raw) {
            Some(event) => {
                ServiceDiagnostics::bump(&self.diagnostics.events_parsed);
                debug!(event_type = event.event_type(), event_id = event.event_id(), "event queued");
                self.push(event);
            }
            None => ServiceDiagnostics::bump(&self.diagnostics.frames_dropped),
        }
    }

    fn on_error(&self, error: RealtimeError) {
        if matches!(error, RealtimeError::NotConnected) {
            debug!("send while disconnected");
            return;
        }
        ServiceDiagnostics::bump(&self.diagnostics.transport_errors);
        error!(error = %error, "transport error");
        let message = error.to_string();
        self.publish(SessionStatus::Error, Some(message.clone()));
        self.push(Event::Error(ErrorEvent::local("transport_error", message)));
    }

    fn on_reconnecting(&self, attempt: u32) {
        self.publish(SessionStatus::Reconnecting, Some(format!("attempt {attempt}")));
    }
}

/// Owns the transport and the inbound queue; builds outbound messages.
pub struct ServiceManager {
    transport: Arc<dyn Transport>,
    events: Arc<EventQueue>,
    diagnostics: Arc<ServiceDiagnostics>,
    status_tx: broadcast::Sender<SessionStatusEvent>,
}

impl ServiceManager {
    /// `make_transport` receives the queue as its [`ConnectionHandler`].
    pub fn new<F>(make_transport: F) -> Self
    where
        F: FnOnce(Arc<dyn ConnectionHandler>) -> Arc<dyn Transport>,
    {
        let diagnostics = Arc::new(ServiceDiagnostics::default());
        let (status_tx, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);
        let events = Arc::new(EventQueue::new(diagnostics.clone(), status_tx.clone()));
        let transport = make_transport(events.clone() as Arc<dyn ConnectionHandler>);
        Self {
            transport,
            events,
            diagnostics,
            status_tx,
        }
    }

    /// Manager over a [`WebSocketConnection`] to `options.connection`.
    pub fn websocket(options: &SessionOptions, policy: ReconnectPolicy) -> Self {
        let options = options.clone();
        Self::new(move |handler| {
            Arc::new(WebSocketConnection::new(&options, policy, handler)) as Arc<dyn Transport>
        })
    }

    pub async fn connect(&self, reconnecting: bool) -> Result<()> {
        let _ = self.status_tx.send(SessionStatusEvent {
            status: SessionStatus::Connecting,
            detail: None,
        });
        if let Err(e) = self.transport.connect(reconnecting).await {
            let _ = self.status_tx.send(SessionStatusEvent {
                status: SessionStatus::Error,
                detail: Some(e.to_string()),
            });
            return Err(e);
        }
        Ok(())
    }

    pub async fn disconnect(&self) {
        self.transport.disconnect().await;
        let _ = self.status_tx.send(SessionStatusEvent {
            status: SessionStatus::Stopped,
            detail: None,
        });
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Send an already-serialized message.
    pub async fn send_raw(&self, raw: String) -> Result<()> {
        self.transport.send(raw).await?;
        ServiceDiagnostics::bump(&self.diagnostics.events_sent);
        Ok(())
    }

    /// Wrap `body` with a fresh event id and send it. Returns the id.
    pub async fn send_event(&self, body: ClientEvent) -> Result<String> {
        let message = OutboundMessage::new(body);
        let json = message.to_json()?;
        self.send_raw(json).await?;
        if !matches!(message.body, ClientEvent::InputAudioBufferAppend { .. }) {
            debug!(event_type = message.event_type(), event_id = %message.event_id, "event sent");
        }
        Ok(message.event_id)
    }

    /// Mirror `options` into the transport and send the full `session.update`.
    pub async fn update_session(&self, options: &SessionOptions) -> Result<String> {
        self.transport.mirror_session(options);
        self.send_event(ClientEvent::SessionUpdate {
            session: options.to_session_config(),
        })
        .await
    }

    pub async fn append_audio(&self, pcm: &[u8]) -> Result<String> {
        self.send_event(ClientEvent::audio_append(pcm)).await
    }

    pub async fn commit_audio_buffer(&self) -> Result<String> {
        self.send_event(ClientEvent::InputAudioBufferCommit {}).await
    }

    pub async fn clear_audio_buffer(&self) -> Result<String> {
        self.send_event(ClientEvent::InputAudioBufferClear {}).await
    }

    pub async fn create_conversation_item(&self, item: OutboundItem) -> Result<String> {
        self.send_event(ClientEvent::ConversationItemCreate {
            previous_item_id: None,
            item,
        })
        .await
    }

    pub async fn truncate_item(
        &self,
        item_id: &str,
        content_index: u32,
        audio_end_ms: u32,
    ) -> Result<String> {
        self.send_event(ClientEvent::ConversationItemTruncate {
            item_id: item_id.to_string(),
            content_index,
            audio_end_ms,
        })
        .await
    }

    pub async fn delete_item(&self, item_id: &str) -> Result<String> {
        self.send_event(ClientEvent::ConversationItemDelete {
            item_id: item_id.to_string(),
        })
        .await
    }

    pub async fn create_response(&self, modalities: Vec<Modality>) -> Result<String> {
        self.send_event(ClientEvent::ResponseCreate {
            response: ResponseParams { modalities },
        })
        .await
    }

    pub async fn cancel_response(&self) -> Result<String> {
        self.send_event(ClientEvent::ResponseCancel {}).await
    }

    /// Next inbound event, or `None` after `timeout`.
    pub async fn get_next_event(&self, timeout: Duration) -> Option<Event> {
        self.events.pop(timeout).await
    }

    pub fn clear_event_queue(&self) -> usize {
        let dropped = self.events.clear();
        if dropped > 0 {
            warn!(dropped, "discarded queued events");
        }
        dropped
    }

    pub fn pending_events(&self) -> usize {
        self.events.len()
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<SessionStatusEvent> {
        self.status_tx.subscribe()
    }

    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::session::ConnectionTarget;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct LoopbackTransport {
        sent: Mutex<Vec<String>>,
        connected: AtomicBool,
        fail_sends: AtomicBool,
        mirrored: Mutex<Option<SessionOptions>>,
    }

    #[async_trait]
    impl Transport for LoopbackTransport {
        async fn connect(&self, _reconnecting: bool) -> Result<()> {
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        }
        async fn send(&self, message: String) -> Result<()> {
            if self.fail_sends.load(Ordering::SeqCst) {
                return Err(RealtimeError::Transport("broken pipe".into()));
            }
            self.sent.lock().push(message);
            Ok(())
        }
        async fn disconnect(&self) {
            self.connected.store(false, Ordering::SeqCst);
        }
        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }
        fn mirror_session(&self, options: &SessionOptions) {
            *self.mirrored.lock() = Some(options.clone());
        }
    }

    fn manager() -> (ServiceManager, Arc<LoopbackTransport>, Arc<dyn ConnectionHandler>) {
        let transport = Arc::new(LoopbackTransport::default());
        let mut handler = None;
        let t = transport.clone();
        let manager = ServiceManager::new(|h| {
            handler = Some(h);
            t as Arc<dyn Transport>
        });
        (manager, transport, handler.unwrap())
    }

    fn sent_types(transport: &LoopbackTransport) -> Vec<String> {
        transport
            .sent
            .lock()
            .iter()
            .map(|raw| {
                let v: serde_json::Value = serde_json::from_str(raw).unwrap();
                v["type"].as_str().unwrap().to_string()
            })
            .collect()
    }

    #[tokio::test]
    async fn frames_become_events_in_order() {
        let (manager, _, handler) = manager();
        handler.on_message_received(r#"{"type":"response.text.delta","delta":"a"}"#);
        handler.on_message_received(r#"{"type":"nope"}"#);
        handler.on_message_received(r#"{"type":"response.text.delta","delta":"b"}"#);

        let first = manager.get_next_event(EVENT_POLL_TIMEOUT).await.unwrap();
        let second = manager.get_next_event(EVENT_POLL_TIMEOUT).await.unwrap();
        assert!(matches!(first, Event::ResponseTextDelta(ref d) if d.delta == "a"));
        assert!(matches!(second, Event::ResponseTextDelta(ref d) if d.delta == "b"));
        assert!(manager.get_next_event(Duration::from_millis(10)).await.is_none());

        let diag = manager.diagnostics();
        assert_eq!(diag.frames_received, 3);
        assert_eq!(diag.frames_dropped, 1);
    }

    #[tokio::test]
    async fn waiting_pop_wakes_on_push() {
        let (manager, _, handler) = manager();
        let manager = Arc::new(manager);
        let waiter = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.get_next_event(Duration::from_secs(2)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        handler.on_message_received(r#"{"type":"response.done","response":{"id":"r1"}}"#);
        let event = waiter.await.unwrap();
        assert!(matches!(event, Some(Event::ResponseDone(_))));
    }

    #[tokio::test]
    async fn clear_empties_queue() {
        let (manager, _, handler) = manager();
        for _ in 0..5 {
            handler.on_message_received(r#"{"type":"response.audio.delta","delta":"AAA="}"#);
        }
        assert_eq!(manager.pending_events(), 5);
        assert_eq!(manager.clear_event_queue(), 5);
        assert_eq!(manager.pending_events(), 0);
    }

    #[tokio::test]
    async fn transport_error_becomes_local_error_event() {
        let (manager, _, handler) = manager();
        let mut status = manager.subscribe_status();
        handler.on_error(RealtimeError::Transport("reset by peer".into()));
        let Some(Event::Error(e)) = manager.get_next_event(EVENT_POLL_TIMEOUT).await else {
            panic!("expected error event");
        };
        assert_eq!(e.error.kind, "transport_error");
        assert!(e.error.message.contains("reset by peer"));
        assert_eq!(status.recv().await.unwrap().status, SessionStatus::Error);
    }

    #[tokio::test]
    async fn not_connected_is_not_surfaced() {
        let (manager, _, handler) = manager();
        handler.on_error(RealtimeError::NotConnected);
        assert!(manager.get_next_event(Duration::from_millis(10)).await.is_none());
        assert_eq!(manager.diagnostics().transport_errors, 0);
    }

    #[tokio::test]
    async fn update_session_mirrors_and_sends_full_config() {
        let (manager, transport, _) = manager();
        let mut options = SessionOptions::new(ConnectionTarget::direct("k"));
        options.instructions = "be brief".into();
        manager.update_session(&options).await.unwrap();

        assert_eq!(transport.mirrored.lock().as_ref(), Some(&options));
        let raw = transport.sent.lock()[0].clone();
        let v: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(v["type"], "session.update");
        assert_eq!(v["session"]["instructions"], "be brief");
        assert!(v["session"].get("tools").is_some());
    }

    #[tokio::test]
    async fn builders_emit_expected_types_with_distinct_ids() {
        let (manager, transport, _) = manager();
        let ids = vec![
            manager.append_audio(&[1, 2]).await.unwrap(),
            manager.commit_audio_buffer().await.unwrap(),
            manager.clear_audio_buffer().await.unwrap(),
            manager.truncate_item("item_1", 0, 640).await.unwrap(),
            manager.delete_item("item_1").await.unwrap(),
            manager.create_response(vec![Modality::Text]).await.unwrap(),
            manager.cancel_response().await.unwrap(),
        ];
        let unique: std::collections::HashSet<_> = ids.iter().collect();
        assert_eq!(unique.len(), ids.len());
        assert_eq!(
            sent_types(&transport),
            vec![
                "input_audio_buffer.append",
                "input_audio_buffer.commit",
                "input_audio_buffer.clear",
                "conversation.item.truncate",
                "conversation.item.delete",
                "response.create",
                "response.cancel",
            ]
        );
        assert_eq!(manager.diagnostics().events_sent, 7);
    }

    #[tokio::test]
    async fn failed_send_is_returned() {
        let (manager, transport, _) = manager();
        transport.fail_sends.store(true, Ordering::SeqCst);
        let err = manager.cancel_response().await.unwrap_err();
        assert!(err.is_transport());
        assert_eq!(manager.diagnostics().events_sent, 0);
    }
}
