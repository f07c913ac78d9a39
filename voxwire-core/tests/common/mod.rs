#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use voxwire_core::handler::{ConversationHandler, FunctionExecutor, OutputChunk, OutputSink};
use voxwire_core::service::{ConnectionHandler, ServiceManager, Transport};
use voxwire_core::{
    AudioOutput, ConnectionTarget, EventHandler, RealtimeClient, RealtimeError, Result, Role,
    SessionOptions,
};

/// Ordered record of everything the fakes observed.
pub type Journal = Arc<Mutex<Vec<String>>>;

pub struct FakeTransport {
    journal: Journal,
    handler: Arc<dyn ConnectionHandler>,
    sent: Mutex<Vec<Value>>,
    connected: AtomicBool,
    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,
    pub mirrored: Mutex<Option<SessionOptions>>,
    /// Outbound types whose sends fail with a transport error.
    pub failing: Mutex<Vec<String>>,
}

impl FakeTransport {
    pub fn fail_sends_of(&self, ty: &str) {
        self.failing.lock().push(ty.to_string());
    }

    /// Deliver a raw inbound frame as if it came off the wire.
    pub fn inject(&self, raw: &str) {
        self.handler.on_message_received(raw);
    }

    pub fn inject_json(&self, frame: Value) {
        self.inject(&frame.to_string());
    }

    pub fn sent(&self) -> Vec<Value> {
        self.sent.lock().clone()
    }

    pub fn sent_types(&self) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .map(|m| m["type"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    pub fn sent_of_type(&self, ty: &str) -> Vec<Value> {
        self.sent
            .lock()
            .iter()
            .filter(|m| m["type"] == ty)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn connect(&self, _reconnecting: bool) -> Result<()> {
        self.connected.store(true, Ordering::SeqCst);
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.journal.lock().push("connect".into());
        self.handler.on_connected(false);
        Ok(())
    }

    async fn send(&self, message: String) -> Result<()> {
        let value: Value = serde_json::from_str(&message)?;
        let ty = value["type"].as_str().unwrap_or_default().to_string();
        if self.failing.lock().contains(&ty) {
            self.journal.lock().push(format!("fail:{ty}"));
            return Err(RealtimeError::Transport(format!("{ty} rejected")));
        }
        self.journal.lock().push(format!("send:{ty}"));
        self.sent.lock().push(value);
        Ok(())
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.journal.lock().push("disconnect".into());
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn mirror_session(&self, options: &SessionOptions) {
        *self.mirrored.lock() = Some(options.clone());
    }
}

pub struct FakeOutput {
    journal: Journal,
    pub chunks: Mutex<Vec<Vec<u8>>>,
    pub playing: AtomicBool,
    pub drains: AtomicUsize,
    pub played: Mutex<Duration>,
}

impl AudioOutput for FakeOutput {
    fn enqueue(&self, chunk: Vec<u8>) {
        self.journal.lock().push("enqueue".into());
        self.chunks.lock().push(chunk);
    }

    fn drain_and_restart(&self) {
        self.journal.lock().push("drain".into());
        self.drains.fetch_add(1, Ordering::SeqCst);
        self.chunks.lock().clear();
        *self.played.lock() = Duration::ZERO;
    }

    fn is_audio_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    fn played_duration(&self) -> Duration {
        *self.played.lock()
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub outputs: Mutex<Vec<(Role, OutputChunk)>>,
    pub errors: Mutex<Vec<String>>,
    pub done: Mutex<Vec<(String, String)>>,
}

impl RecordingSink {
    pub fn text(&self) -> String {
        self.outputs
            .lock()
            .iter()
            .filter_map(|(_, chunk)| match chunk {
                OutputChunk::Text(t) | OutputChunk::Transcript(t) => Some(t.as_str()),
                OutputChunk::Audio(_) => None,
            })
            .collect()
    }
}

impl OutputSink for RecordingSink {
    fn emit(&self, role: Role, chunk: OutputChunk) {
        self.outputs.lock().push((role, chunk));
    }

    fn error(&self, message: &str) {
        self.errors.lock().push(message.to_string());
    }

    fn response_done(&self, response_id: &str, status: &str) {
        self.done
            .lock()
            .push((response_id.to_string(), status.to_string()));
    }
}

/// Executor that records calls and answers with a fixed value.
pub struct ScriptedExecutor {
    pub calls: Mutex<Vec<(String, Value)>>,
    pub reply: std::result::Result<Value, String>,
}

impl ScriptedExecutor {
    pub fn ok(reply: Value) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            reply: Ok(reply),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            reply: Err(message.to_string()),
        }
    }
}

#[async_trait]
impl FunctionExecutor for ScriptedExecutor {
    async fn execute(&self, name: &str, arguments: Value) -> anyhow::Result<Value> {
        self.calls.lock().push((name.to_string(), arguments));
        self.reply.clone().map_err(anyhow::Error::msg)
    }
}

pub struct Harness {
    pub client: RealtimeClient,
    pub transport: Arc<FakeTransport>,
    pub output: Option<Arc<FakeOutput>>,
    pub sink: Arc<RecordingSink>,
    pub conversation: Option<Arc<ConversationHandler>>,
    pub journal: Journal,
}

pub fn server_vad_options() -> SessionOptions {
    SessionOptions::new(ConnectionTarget::direct("sk-test"))
}

pub fn client_vad_options() -> SessionOptions {
    let mut options = server_vad_options();
    options.turn_detection = None;
    options
}

pub struct HarnessBuilder {
    options: SessionOptions,
    executor: Option<Arc<dyn FunctionExecutor>>,
    handler: Option<Arc<dyn EventHandler>>,
    audio_output: bool,
}

impl HarnessBuilder {
    pub fn options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn executor(mut self, executor: Arc<dyn FunctionExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn without_audio_output(mut self) -> Self {
        self.audio_output = false;
        self
    }

    pub fn build(self) -> Harness {
        let journal: Journal = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::new(RecordingSink::default());

        let mut transport = None;
        let service = ServiceManager::new(|handler| {
            let fake = Arc::new(FakeTransport {
                journal: journal.clone(),
                handler,
                sent: Mutex::new(Vec::new()),
                connected: AtomicBool::new(false),
                connects: AtomicUsize::new(0),
                disconnects: AtomicUsize::new(0),
                mirrored: Mutex::new(None),
                failing: Mutex::new(Vec::new()),
            });
            transport = Some(fake.clone());
            fake as Arc<dyn Transport>
        });
        let transport = transport.expect("transport factory called");

        let (handler, conversation): (Arc<dyn EventHandler>, _) = match self.handler {
            Some(handler) => (handler, None),
            None => {
                let mut conversation = ConversationHandler::new(sink.clone());
                if let Some(executor) = self.executor {
                    conversation = conversation.with_executor(executor);
                }
                let conversation = Arc::new(conversation);
                (conversation.clone() as Arc<dyn EventHandler>, Some(conversation))
            }
        };

        let output = self.audio_output.then(|| {
            Arc::new(FakeOutput {
                journal: journal.clone(),
                chunks: Mutex::new(Vec::new()),
                playing: AtomicBool::new(false),
                drains: AtomicUsize::new(0),
                played: Mutex::new(Duration::ZERO),
            })
        });

        let mut builder = RealtimeClient::builder(self.options, handler).service(service);
        if let Some(output) = &output {
            builder = builder.audio_output(output.clone());
        }

        Harness {
            client: builder.build(),
            transport,
            output,
            sink,
            conversation,
            journal,
        }
    }
}

impl Harness {
    pub fn builder() -> HarnessBuilder {
        HarnessBuilder {
            options: server_vad_options(),
            executor: None,
            handler: None,
            audio_output: true,
        }
    }

    pub async fn started() -> Harness {
        let h = Harness::builder().build();
        h.client.start().await.expect("start");
        h
    }

    pub fn output(&self) -> &FakeOutput {
        self.output.as_deref().expect("harness has audio output")
    }

    /// Journal entries recorded after the session was configured.
    pub fn journal_after_setup(&self) -> Vec<String> {
        let journal = self.journal.lock();
        let start = journal
            .iter()
            .position(|e| e == "send:session.update")
            .map_or(0, |i| i + 1);
        journal[start..].to_vec()
    }
}

pub async fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..300 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Index of `needle` in `haystack`, panicking with context when absent.
pub fn position(haystack: &[String], needle: &str) -> usize {
    haystack
        .iter()
        .position(|e| e == needle)
        .unwrap_or_else(|| panic!("{needle} not found in {haystack:?}"))
}
