//! One full-duplex WebSocket to the realtime service.
//!
//! The receive loop owns recovery. A service-issued session expiry triggers a
//! reconnect after a fixed backoff; transport loss reconnects with exponential
//! backoff when auto-reconnect is enabled and is surfaced through
//! [`ConnectionHandler::on_error`] otherwise. Every reconnect dials the
//! mirrored target and model and re-sends the mirrored `session.update`.
//!
//! While the socket is down, sends fail with `NotConnected` and are not
//! reported to the handler; only a give-up is.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::error::{RealtimeError, Result};
use crate::protocol::outbound::{ClientEvent, OutboundMessage};
use crate::protocol::session::{ConnectionTarget, SessionConfig, SessionOptions};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// How long one receive poll waits before re-checking the close flag.
const RECEIVE_POLL: Duration = Duration::from_millis(250);
/// Wait before reconnecting after the service expires the session.
const SESSION_EXPIRY_BACKOFF: Duration = Duration::from_secs(1);
const JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Inbound seam: receives everything the connection observes.
pub trait ConnectionHandler: Send + Sync {
    fn on_connected(&self, reconnecting: bool);
    fn on_message_received(&self, raw: &str);
    fn on_error(&self, error: RealtimeError);
    fn on_reconnecting(&self, _attempt: u32) {}
}

/// Outbound seam over the wire connection.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, reconnecting: bool) -> Result<()>;
    async fn send(&self, message: String) -> Result<()>;
    async fn disconnect(&self);
    fn is_connected(&self) -> bool;
    /// Remember `options` so a reconnect resumes with them.
    fn mirror_session(&self, options: &SessionOptions);
}

/// Exponential backoff for transport loss.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// 0 = unlimited.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_millis(30_000),
            multiplier: 2.0,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let ms = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exp);
        let capped = ms.min(self.max_delay.as_millis() as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    /// Whether another attempt is allowed after `attempts_made`.
    pub fn should_retry(&self, attempts_made: u32) -> bool {
        self.max_attempts == 0 || attempts_made < self.max_attempts
    }
}

/// Error frame carrying the service's "session hit its maximum duration" marker.
pub fn is_session_expiry(raw: &str) -> bool {
    if !(raw.contains("session_expired") || raw.contains("maximum duration")) {
        return false;
    }
    serde_json::from_str::<Value>(raw)
        .ok()
        .and_then(|v| v.get("type").and_then(Value::as_str).map(|t| t == "error"))
        .unwrap_or(false)
}

enum LoopExit {
    Closed,
    SessionExpired,
    Lost(String),
}

/// Latest session options; read on every (re)connect.
struct Mirrored {
    target: ConnectionTarget,
    model: String,
    session: SessionConfig,
    auto_reconnect: bool,
}

impl Mirrored {
    fn from_options(options: &SessionOptions) -> Self {
        Self {
            target: options.connection.clone(),
            model: options.model.clone(),
            session: options.to_session_config(),
            auto_reconnect: options.enable_auto_reconnect,
        }
    }
}

struct Shared {
    policy: ReconnectPolicy,
    handler: Arc<dyn ConnectionHandler>,
    sink: tokio::sync::Mutex<Option<WsSink>>,
    connected: AtomicBool,
    closing: AtomicBool,
    mirrored: Mutex<Mirrored>,
    reconnects: AtomicU32,
}

impl Shared {
    async fn establish(&self) -> Result<WsSource> {
        let (url, headers) = {
            let mirrored = self.mirrored.lock();
            (
                mirrored.target.request_url(&mirrored.model),
                mirrored.target.headers(),
            )
        };
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| RealtimeError::Transport(format!("invalid url {url}: {e}")))?;
        for (name, value) in headers {
            let value = HeaderValue::from_str(&value)
                .map_err(|e| RealtimeError::Transport(format!("invalid {name} header: {e}")))?;
            request.headers_mut().insert(name, value);
        }

        let (ws, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| RealtimeError::Transport(e.to_string()))?;
        let (sink, source) = ws.split();
        *self.sink.lock().await = Some(sink);
        self.connected.store(true, Ordering::SeqCst);
        info!(url = %url, "realtime connection open");
        Ok(source)
    }

    async fn write(&self, message: Message) -> Result<()> {
        let mut guard = self.sink.lock().await;
        let sink = guard.as_mut().ok_or(RealtimeError::NotConnected)?;
        sink.send(message)
            .await
            .map_err(|e| RealtimeError::Transport(e.to_string()))
    }

    async fn restore_session(&self) {
        let session = self.mirrored.lock().session.clone();
        let message = OutboundMessage::new(ClientEvent::SessionUpdate { session });
        let json = match message.to_json() {
            Ok(json) => json,
            Err(e) => {
                error!(error = %e, "failed to serialize mirrored session");
                return;
            }
        };
        match self.write(Message::Text(json.into())).await {
            Ok(()) => info!(event_id = %message.event_id, "session options re-applied"),
            Err(e) => warn!(error = %e, "failed to re-apply session options"),
        }
    }

    fn auto_reconnect(&self) -> bool {
        self.mirrored.lock().auto_reconnect
    }

    fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }
}

/// [`Transport`] over `tokio-tungstenite`.
pub struct WebSocketConnection {
    shared: Arc<Shared>,
    receiver: Mutex<Option<JoinHandle<()>>>,
}

impl WebSocketConnection {
    pub fn new(
        options: &SessionOptions,
        policy: ReconnectPolicy,
        handler: Arc<dyn ConnectionHandler>,
    ) -> Self {
        // Fails only when a provider is already installed.
        let _ = rustls::crypto::ring::default_provider().install_default();

        Self {
            shared: Arc::new(Shared {
                policy,
                handler,
                sink: tokio::sync::Mutex::new(None),
                connected: AtomicBool::new(false),
                closing: AtomicBool::new(false),
                mirrored: Mutex::new(Mirrored::from_options(options)),
                reconnects: AtomicU32::new(0),
            }),
            receiver: Mutex::new(None),
        }
    }

    /// Successful reconnects since construction.
    pub fn reconnect_count(&self) -> u32 {
        self.shared.reconnects.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Transport for WebSocketConnection {
    async fn connect(&self, reconnecting: bool) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        self.shared.closing.store(false, Ordering::SeqCst);

        let source = self.shared.establish().await?;
        if reconnecting {
            self.shared.restore_session().await;
        }
        self.shared.handler.on_connected(reconnecting);

        let handle = tokio::spawn(receive_loop(self.shared.clone(), source));
        if let Some(previous) = self.receiver.lock().replace(handle) {
            previous.abort();
        }
        Ok(())
    }

    async fn send(&self, message: String) -> Result<()> {
        let result = self.shared.write(Message::Text(message.into())).await;
        if let Err(RealtimeError::Transport(reason)) = &result {
            // With auto-reconnect the receive loop owns recovery and reports
            // only when it gives up.
            if self.shared.auto_reconnect() {
                debug!(reason = %reason, "send failed while connection is recovering");
            } else {
                self.shared
                    .handler
                    .on_error(RealtimeError::Transport(reason.clone()));
            }
        }
        result
    }

    async fn disconnect(&self) {
        self.shared.closing.store(true, Ordering::SeqCst);
        self.shared.connected.store(false, Ordering::SeqCst);

        if let Some(mut sink) = self.shared.sink.lock().await.take() {
            if let Err(e) = sink.send(Message::Close(None)).await {
                debug!(error = %e, "close frame not sent");
            }
            let _ = sink.close().await;
        }

        let handle = self.receiver.lock().take();
        if let Some(handle) = handle {
            let abort = handle.abort_handle();
            if tokio::time::timeout(JOIN_TIMEOUT, handle).await.is_err() {
                warn!("receive loop did not stop within timeout, aborting");
                abort.abort();
            }
        }
        info!("realtime connection closed");
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    fn mirror_session(&self, options: &SessionOptions) {
        *self.shared.mirrored.lock() = Mirrored::from_options(options);
    }
}

async fn receive_loop(shared: Arc<Shared>, mut source: WsSource) {
    loop {
        let mut exit = pump(&shared, &mut source).await;
        if shared.is_closing() {
            shared.connected.store(false, Ordering::SeqCst);
            break;
        }
        // Drop the dead half before flagging the loss so later sends see
        // `NotConnected` instead of writing into a closed socket.
        shared.sink.lock().await.take();
        shared.connected.store(false, Ordering::SeqCst);

        let mut attempt: u32 = 0;
        let reconnected = loop {
            let delay = match &exit {
                LoopExit::Closed => break None,
                LoopExit::SessionExpired => {
                    info!("session expired, reconnecting");
                    SESSION_EXPIRY_BACKOFF
                }
                LoopExit::Lost(reason) => {
                    if !shared.auto_reconnect() || !shared.policy.should_retry(attempt) {
                        error!(reason = %reason, attempts = attempt, "connection lost, giving up");
                        shared.handler.on_error(RealtimeError::Transport(format!(
                            "connection lost after {attempt} reconnect attempts: {reason}"
                        )));
                        break None;
                    }
                    attempt += 1;
                    let delay = shared.policy.delay_for(attempt);
                    warn!(reason = %reason, attempt, delay_ms = delay.as_millis() as u64, "connection lost, reconnecting");
                    shared.handler.on_reconnecting(attempt);
                    delay
                }
            };

            tokio::time::sleep(delay).await;
            if shared.is_closing() {
                break None;
            }
            match shared.establish().await {
                Ok(source) => break Some(source),
                Err(e) => exit = LoopExit::Lost(e.to_string()),
            }
        };

        let Some(next) = reconnected else { break };
        source = next;
        shared.reconnects.fetch_add(1, Ordering::Relaxed);
        shared.restore_session().await;
        shared.handler.on_connected(true);
    }
    debug!("receive loop finished");
}

async fn pump(shared: &Shared, source: &mut WsSource) -> LoopExit {
    loop {
        if shared.is_closing() {
            return LoopExit::Closed;
        }
        let message = match tokio::time::timeout(RECEIVE_POLL, source.next()).await {
            Err(_) => continue,
            Ok(None) => return LoopExit::Lost("stream ended".to_string()),
            Ok(Some(Err(e))) => return LoopExit::Lost(e.to_string()),
            Ok(Some(Ok(message))) => message,
        };

        match message {
            Message::Text(text) => {
                let expired = is_session_expiry(text.as_str());
                shared.handler.on_message_received(text.as_str());
                if expired {
                    return LoopExit::SessionExpired;
                }
            }
            Message::Ping(data) => {
                if let Err(e) = shared.write(Message::Pong(data)).await {
                    warn!(error = %e, "failed to answer ping");
                }
            }
            Message::Close(frame) => {
                if shared.is_closing() {
                    return LoopExit::Closed;
                }
                return LoopExit::Lost(format!("closed by service: {frame:?}"));
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

    const EXPIRY_FRAME: &str = r#"{"type":"error","error":{"type":"invalid_request_error","code":"session_expired","message":"Your session hit the maximum duration of 30 minutes."}}"#;

    /// What the loopback server does with one accepted connection.
    #[derive(Clone, Copy)]
    enum Script {
        /// Record frames until the client closes.
        Hold,
        /// Finish the handshake, then drop the socket.
        Drop,
        /// Send the session-expiry error after a pause, then hold.
        Expire(Duration),
    }

    struct LoopbackServer {
        base_url: String,
        accepted: Arc<AtomicUsize>,
        /// `(uri, authorization)` per handshake.
        requests: Arc<Mutex<Vec<(String, String)>>>,
        /// `(connection index, text)` per frame received.
        frames: Arc<Mutex<Vec<(usize, String)>>>,
        closed: Arc<AtomicUsize>,
    }

    impl LoopbackServer {
        /// `scripts[i]` drives the i-th connection, the last one repeats.
        /// With `listen_for`, the listener closes after that many accepts.
        async fn start(scripts: Vec<Script>, listen_for: Option<usize>) -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let base_url = format!("ws://{}/v1/realtime", listener.local_addr().unwrap());
            let server = Self {
                base_url,
                accepted: Arc::new(AtomicUsize::new(0)),
                requests: Arc::new(Mutex::new(Vec::new())),
                frames: Arc::new(Mutex::new(Vec::new())),
                closed: Arc::new(AtomicUsize::new(0)),
            };

            let accepted = server.accepted.clone();
            let requests = server.requests.clone();
            let frames = server.frames.clone();
            let closed = server.closed.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let index = accepted.fetch_add(1, Ordering::SeqCst);
                    let script = scripts[index.min(scripts.len() - 1)];
                    tokio::spawn(serve(
                        stream,
                        index,
                        script,
                        requests.clone(),
                        frames.clone(),
                        closed.clone(),
                    ));
                    if listen_for == Some(index + 1) {
                        break;
                    }
                }
            });
            server
        }

        fn options(&self, api_key: &str) -> SessionOptions {
            SessionOptions::new(ConnectionTarget::Direct {
                url: self.base_url.clone(),
                api_key: api_key.to_string(),
            })
        }

        fn frames_on(&self, connection: usize) -> Vec<Value> {
            self.frames
                .lock()
                .iter()
                .filter(|(index, _)| *index == connection)
                .map(|(_, text)| serde_json::from_str(text).unwrap())
                .collect()
        }
    }

    async fn serve(
        stream: TcpStream,
        index: usize,
        script: Script,
        requests: Arc<Mutex<Vec<(String, String)>>>,
        frames: Arc<Mutex<Vec<(usize, String)>>>,
        closed: Arc<AtomicUsize>,
    ) {
        let callback = move |request: &Request, response: Response| -> std::result::Result<Response, ErrorResponse> {
            let auth = request
                .headers()
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();
            requests.lock().push((request.uri().to_string(), auth));
            Ok(response)
        };
        let Ok(mut ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await else {
            return;
        };
        match script {
            Script::Drop => return,
            Script::Expire(pause) => {
                tokio::time::sleep(pause).await;
                let _ = ws.send(Message::Text(EXPIRY_FRAME.into())).await;
            }
            Script::Hold => {}
        }
        while let Some(Ok(message)) = ws.next().await {
            match message {
                Message::Text(text) => frames.lock().push((index, text.as_str().to_string())),
                Message::Close(_) => break,
                _ => {}
            }
        }
        closed.fetch_add(1, Ordering::SeqCst);
    }

    #[derive(Default)]
    struct Recorder {
        log: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn entries(&self) -> Vec<String> {
            self.log.lock().clone()
        }

        fn errors(&self) -> Vec<String> {
            self.entries()
                .into_iter()
                .filter(|e| e.starts_with("error:"))
                .collect()
        }

        fn saw(&self, entry: &str) -> bool {
            self.log.lock().iter().any(|e| e == entry)
        }
    }

    impl ConnectionHandler for Recorder {
        fn on_connected(&self, reconnecting: bool) {
            self.log.lock().push(format!("connected:{reconnecting}"));
        }

        fn on_message_received(&self, raw: &str) {
            self.log.lock().push(format!("message:{raw}"));
        }

        fn on_error(&self, error: RealtimeError) {
            self.log.lock().push(format!("error:{error}"));
        }

        fn on_reconnecting(&self, attempt: u32) {
            self.log.lock().push(format!("reconnecting:{attempt}"));
        }
    }

    fn fast_policy(max_attempts: u32, initial_ms: u64) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(initial_ms),
            max_delay: Duration::from_millis(initial_ms * 4),
            multiplier: 2.0,
        }
    }

    async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
        for _ in 0..500 {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        condition()
    }

    #[tokio::test]
    async fn sends_during_reconnect_backoff_fail_quietly() {
        let server = LoopbackServer::start(vec![Script::Drop, Script::Hold], None).await;
        let recorder = Arc::new(Recorder::default());
        let conn = WebSocketConnection::new(&server.options("sk-a"), fast_policy(5, 400), recorder.clone());
        conn.connect(false).await.unwrap();

        assert!(eventually(|| !conn.is_connected()).await);
        for _ in 0..10 {
            let err = conn.send("{}".to_string()).await.unwrap_err();
            assert!(matches!(err, RealtimeError::NotConnected), "{err}");
        }
        assert!(recorder.errors().is_empty(), "{:?}", recorder.entries());

        assert!(eventually(|| recorder.saw("connected:true")).await);
        assert!(conn.is_connected());
        assert!(recorder.saw("reconnecting:1"));
        assert!(recorder.errors().is_empty());
        assert_eq!(conn.reconnect_count(), 1);
        conn.disconnect().await;
    }

    #[tokio::test]
    async fn session_expiry_reconnects_and_restores_session() {
        let server = LoopbackServer::start(
            vec![Script::Expire(Duration::from_millis(50)), Script::Hold],
            None,
        )
        .await;
        let recorder = Arc::new(Recorder::default());
        let mut options = server.options("sk-a");
        options.instructions = "answer in French".into();
        options.enable_auto_reconnect = false;
        let conn = WebSocketConnection::new(&options, ReconnectPolicy::default(), recorder.clone());
        conn.connect(false).await.unwrap();

        assert!(eventually(|| recorder.saw("connected:true")).await);
        assert!(recorder.saw(&format!("message:{EXPIRY_FRAME}")));
        assert_eq!(server.accepted.load(Ordering::SeqCst), 2);

        assert!(eventually(|| !server.frames_on(1).is_empty()).await);
        let restored = &server.frames_on(1)[0];
        assert_eq!(restored["type"], "session.update");
        assert_eq!(restored["session"]["instructions"], "answer in French");
        assert!(recorder.errors().is_empty());
        conn.disconnect().await;
    }

    #[tokio::test]
    async fn reconnect_uses_latest_mirrored_target_and_model() {
        let server = LoopbackServer::start(
            vec![Script::Expire(Duration::from_millis(100)), Script::Hold],
            None,
        )
        .await;
        let recorder = Arc::new(Recorder::default());
        let conn = WebSocketConnection::new(&server.options("sk-old"), ReconnectPolicy::default(), recorder.clone());
        conn.connect(false).await.unwrap();

        let mut updated = server.options("sk-rotated");
        updated.model = "gpt-4o-mini-realtime-preview".into();
        updated.voice = "verse".into();
        conn.mirror_session(&updated);

        assert!(eventually(|| recorder.saw("connected:true")).await);
        let requests = server.requests.lock().clone();
        assert_eq!(requests.len(), 2);
        assert!(requests[0].0.ends_with("model=gpt-4o-realtime-preview"));
        assert_eq!(requests[0].1, "Bearer sk-old");
        assert!(requests[1].0.ends_with("model=gpt-4o-mini-realtime-preview"));
        assert_eq!(requests[1].1, "Bearer sk-rotated");

        assert!(eventually(|| !server.frames_on(1).is_empty()).await);
        assert_eq!(server.frames_on(1)[0]["session"]["voice"], "verse");
        conn.disconnect().await;
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let server = LoopbackServer::start(vec![Script::Drop], Some(1)).await;
        let recorder = Arc::new(Recorder::default());
        let conn = WebSocketConnection::new(&server.options("sk-a"), fast_policy(2, 20), recorder.clone());
        conn.connect(false).await.unwrap();

        assert!(eventually(|| !recorder.errors().is_empty()).await);
        let errors = recorder.errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("after 2 reconnect attempts"), "{errors:?}");
        assert!(recorder.saw("reconnecting:1"));
        assert!(recorder.saw("reconnecting:2"));
        assert!(!recorder.saw("reconnecting:3"));
        assert!(!recorder.saw("connected:true"));

        assert!(!conn.is_connected());
        assert!(matches!(
            conn.send("{}".to_string()).await,
            Err(RealtimeError::NotConnected)
        ));
        assert_eq!(recorder.errors().len(), 1);
        conn.disconnect().await;
    }

    #[tokio::test]
    async fn loss_without_auto_reconnect_is_reported_once() {
        let server = LoopbackServer::start(vec![Script::Drop, Script::Hold], None).await;
        let recorder = Arc::new(Recorder::default());
        let mut options = server.options("sk-a");
        options.enable_auto_reconnect = false;
        let conn = WebSocketConnection::new(&options, fast_policy(5, 20), recorder.clone());
        conn.connect(false).await.unwrap();

        assert!(eventually(|| !recorder.errors().is_empty()).await);
        assert!(!conn.is_connected());
        for _ in 0..5 {
            assert!(conn.send("{}".to_string()).await.is_err());
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(recorder.errors().len(), 1);
        assert_eq!(server.accepted.load(Ordering::SeqCst), 1);
        conn.disconnect().await;
    }

    #[tokio::test]
    async fn disconnect_stops_the_receive_loop() {
        let server = LoopbackServer::start(vec![Script::Hold], None).await;
        let recorder = Arc::new(Recorder::default());
        let conn = WebSocketConnection::new(&server.options("sk-a"), fast_policy(5, 20), recorder.clone());
        conn.connect(false).await.unwrap();
        conn.send(r#"{"type":"input_audio_buffer.clear"}"#.to_string())
            .await
            .unwrap();
        assert!(eventually(|| server.frames_on(0).len() == 1).await);

        conn.disconnect().await;
        assert!(!conn.is_connected());
        assert!(eventually(|| server.closed.load(Ordering::SeqCst) == 1).await);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(server.accepted.load(Ordering::SeqCst), 1);
        assert!(recorder.errors().is_empty());
        assert_eq!(recorder.entries(), vec!["connected:false"]);
        assert!(matches!(
            conn.send("{}".to_string()).await,
            Err(RealtimeError::NotConnected)
        ));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_millis(1_000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(2_000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(4_000));
        assert_eq!(policy.delay_for(10), Duration::from_millis(30_000));
    }

    #[test]
    fn retry_budget() {
        let bounded = ReconnectPolicy {
            max_attempts: 2,
            ..ReconnectPolicy::default()
        };
        assert!(bounded.should_retry(0));
        assert!(bounded.should_retry(1));
        assert!(!bounded.should_retry(2));

        let unlimited = ReconnectPolicy {
            max_attempts: 0,
            ..ReconnectPolicy::default()
        };
        assert!(unlimited.should_retry(1_000));
    }

    #[test]
    fn expiry_marker_only_on_error_frames() {
        assert!(is_session_expiry(
            r#"{"type":"error","error":{"code":"session_expired","message":"x"}}"#
        ));
        assert!(is_session_expiry(
            r#"{"type":"error","error":{"message":"Your session hit the maximum duration of 30 minutes."}}"#
        ));
        assert!(!is_session_expiry(
            r#"{"type":"response.text.delta","delta":"the maximum duration is"}"#
        ));
        assert!(!is_session_expiry(r#"{"type":"error","error":{"code":"rate_limited"}}"#));
    }
}
