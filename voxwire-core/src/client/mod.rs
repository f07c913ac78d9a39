//! The public session API.
//!
//! [`RealtimeClient`] owns the service manager, the event handler and the
//! optional audio output. `start()` connects, applies the session options and
//! spawns the consumption loop; each queued event is dispatched in its own
//! task which the loop awaits before taking the next one, so deltas keep
//! their order and a failing or panicking callback only loses that event.
//!
//! Audio from the capture thread enters through [`RealtimeClient::send_audio`]
//! (or the [`capture_sink`](RealtimeClient::capture_sink) bridge) and is
//! forwarded by a streaming task started on first use.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::audio::{AudioOutput, CaptureSink};
use crate::error::{RealtimeError, Result};
use crate::handler::{dispatch, EventHandler};
use crate::protocol::outbound::OutboundItem;
use crate::protocol::session::SessionOptions;
use crate::protocol::Role;
use crate::service::{DiagnosticsSnapshot, ReconnectPolicy, ServiceManager, EVENT_POLL_TIMEOUT};
use crate::status::SessionStatusEvent;

/// Ordered work for the audio streaming task.
#[derive(Debug)]
enum AudioCommand {
    Append(Vec<u8>),
    /// Local speech started while assistant audio was playing.
    BargeIn,
    /// Local speech ended in client-driven turn detection.
    EndOfSpeech,
}

/// Assistant audio item most recently fed to playback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioItemRef {
    pub item_id: String,
    pub content_index: u32,
}

struct Inner {
    service: ServiceManager,
    handler: Arc<dyn EventHandler>,
    audio_output: Option<Arc<dyn AudioOutput>>,
    options: RwLock<SessionOptions>,
    running: AtomicBool,
    lifecycle: tokio::sync::Mutex<()>,
    runtime: Mutex<Option<Handle>>,
    consumer: Mutex<Option<JoinHandle<()>>>,
    audio_tx: Mutex<Option<mpsc::UnboundedSender<AudioCommand>>>,
    streamer: Mutex<Option<JoinHandle<()>>>,
    current_audio: Mutex<Option<AudioItemRef>>,
}

/// Builder for [`RealtimeClient`].
pub struct ClientBuilder {
    options: SessionOptions,
    handler: Arc<dyn EventHandler>,
    service: Option<ServiceManager>,
    audio_output: Option<Arc<dyn AudioOutput>>,
    reconnect: ReconnectPolicy,
}

impl ClientBuilder {
    pub fn service(mut self, service: ServiceManager) -> Self {
        self.service = Some(service);
        self
    }

    pub fn audio_output(mut self, output: Arc<dyn AudioOutput>) -> Self {
        self.audio_output = Some(output);
        self
    }

    /// Only used for the default websocket service.
    pub fn reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    pub fn build(self) -> RealtimeClient {
        let service = self
            .service
            .unwrap_or_else(|| ServiceManager::websocket(&self.options, self.reconnect.clone()));
        RealtimeClient {
            inner: Arc::new(Inner {
                service,
                handler: self.handler,
                audio_output: self.audio_output,
                options: RwLock::new(self.options),
                running: AtomicBool::new(false),
                lifecycle: tokio::sync::Mutex::new(()),
                runtime: Mutex::new(None),
                consumer: Mutex::new(None),
                audio_tx: Mutex::new(None),
                streamer: Mutex::new(None),
                current_audio: Mutex::new(None),
            }),
        }
    }
}

/// Cheap to clone; all clones drive the same session.
#[derive(Clone)]
pub struct RealtimeClient {
    inner: Arc<Inner>,
}

impl RealtimeClient {
    pub fn builder(options: SessionOptions, handler: Arc<dyn EventHandler>) -> ClientBuilder {
        ClientBuilder {
            options,
            handler,
            service: None,
            audio_output: None,
            reconnect: ReconnectPolicy::default(),
        }
    }

    // ---------------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------------

    /// Connect, apply the session options and start consuming events.
    /// No-op when already running.
    pub async fn start(&self) -> Result<()> {
        let _guard = self.inner.lifecycle.lock().await;
        if self.is_running() {
            debug!("start called while running");
            return Ok(());
        }

        self.inner.service.connect(false).await?;
        let options = self.inner.options.read().clone();
        if let Err(e) = self.inner.service.update_session(&options).await {
            self.inner.service.disconnect().await;
            return Err(e);
        }

        *self.inner.runtime.lock() = Some(Handle::current());
        self.inner.running.store(true, Ordering::SeqCst);
        let handle = tokio::spawn(consume_events(self.clone()));
        *self.inner.consumer.lock() = Some(handle);
        info!(model = %options.model, "realtime session started");
        Ok(())
    }

    /// Stop streaming, disconnect, stop the consumption loop and drop queued
    /// events. No-op when not running.
    pub async fn stop(&self) {
        let _guard = self.inner.lifecycle.lock().await;
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            debug!("stop called while stopped");
            return;
        }

        self.inner.audio_tx.lock().take();
        let streamer = self.inner.streamer.lock().take();
        if let Some(handle) = streamer {
            handle.abort();
        }

        self.inner.service.disconnect().await;

        let consumer = self.inner.consumer.lock().take();
        if let Some(handle) = consumer {
            handle.abort();
            let _ = handle.await;
        }
        self.inner.service.clear_event_queue();
        self.inner.current_audio.lock().take();
        info!("realtime session stopped");
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_running() {
            Ok(())
        } else {
            Err(RealtimeError::NotRunning)
        }
    }

    // ---------------------------------------------------------------------
    // Audio in
    // ---------------------------------------------------------------------

    /// Queue PCM for `input_audio_buffer.append`. Safe to call from any thread.
    pub fn send_audio(&self, pcm: Vec<u8>) -> Result<()> {
        self.push_audio_command(AudioCommand::Append(pcm))
    }

    /// Bridge for [`AudioCapture`](crate::audio::AudioCapture).
    pub fn capture_sink(&self) -> Arc<dyn CaptureSink> {
        Arc::new(ClientCaptureSink {
            client: self.clone(),
        })
    }

    fn push_audio_command(&self, command: AudioCommand) -> Result<()> {
        self.ensure_running()?;
        let mut tx = self.inner.audio_tx.lock();
        if let Some(sender) = tx.as_ref() {
            if !sender.is_closed() {
                return sender
                    .send(command)
                    .map_err(|_| RealtimeError::State("audio stream closed".into()));
            }
        }

        let runtime = self
            .inner
            .runtime
            .lock()
            .clone()
            .ok_or(RealtimeError::NotRunning)?;
        let (sender, receiver) = mpsc::unbounded_channel();
        sender
            .send(command)
            .map_err(|_| RealtimeError::State("audio stream closed".into()))?;
        let handle = runtime.spawn(stream_audio(self.clone(), receiver));
        *tx = Some(sender);
        if let Some(previous) = self.inner.streamer.lock().replace(handle) {
            previous.abort();
        }
        debug!("audio streaming task started");
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Conversation
    // ---------------------------------------------------------------------

    /// Add a text message. With `generate_response`, ask for a reply right
    /// away without committing the audio buffer.
    pub async fn send_text(&self, text: &str, role: Role, generate_response: bool) -> Result<()> {
        self.ensure_running()?;
        self.inner
            .service
            .create_conversation_item(OutboundItem::text(role, text))
            .await?;
        if generate_response {
            self.request_response().await?;
        }
        Ok(())
    }

    /// Request a response, first committing the input buffer when asked.
    pub async fn generate_response(&self, commit_audio_buffer: bool) -> Result<()> {
        self.ensure_running()?;
        if commit_audio_buffer {
            self.inner.service.commit_audio_buffer().await?;
        }
        self.request_response().await
    }

    async fn request_response(&self) -> Result<()> {
        let modalities = self.inner.options.read().modalities.clone();
        self.inner.service.create_response(modalities).await?;
        Ok(())
    }

    /// Cancel the in-flight response and drop every event already queued.
    pub async fn cancel_response(&self) -> Result<()> {
        self.ensure_running()?;
        let sent = self.inner.service.cancel_response().await;
        self.inner.service.clear_event_queue();
        sent.map(drop)
    }

    pub async fn truncate_response(
        &self,
        item_id: &str,
        content_index: u32,
        audio_end_ms: u32,
    ) -> Result<()> {
        self.ensure_running()?;
        self.inner
            .service
            .truncate_item(item_id, content_index, audio_end_ms)
            .await?;
        Ok(())
    }

    pub async fn delete_item(&self, item_id: &str) -> Result<()> {
        self.ensure_running()?;
        self.inner.service.delete_item(item_id).await?;
        Ok(())
    }

    /// Replace the session options. Sent immediately when running, and kept
    /// for every later (re)connect.
    pub async fn update_session(&self, options: SessionOptions) -> Result<()> {
        if self.is_running() {
            self.inner.service.update_session(&options).await?;
        }
        *self.inner.options.write() = options;
        Ok(())
    }

    /// Barge-in: clear input, cancel the response, drain playback, then
    /// truncate the interrupted assistant item at what was actually heard.
    ///
    /// Every step runs even if an earlier send fails; the first error is
    /// returned.
    pub async fn interrupt_response(&self) -> Result<()> {
        self.ensure_running()?;
        let cleared = self.inner.service.clear_audio_buffer().await.map(drop);
        let cancelled = self.cancel_response().await;

        let played = self.inner.audio_output.as_ref().map(|output| {
            let played = output.played_duration();
            output.drain_and_restart();
            played
        });

        let interrupted = self.inner.current_audio.lock().take();
        let truncated = match (interrupted, played) {
            (Some(item), Some(played)) => {
                let audio_end_ms = u32::try_from(played.as_millis()).unwrap_or(u32::MAX);
                debug!(item_id = %item.item_id, audio_end_ms, "truncating interrupted item");
                self.truncate_response(&item.item_id, item.content_index, audio_end_ms)
                    .await
            }
            _ => Ok(()),
        };
        cleared.and(cancelled).and(truncated)
    }

    /// Send a tool result as `function_call_output`, then ask the service to
    /// continue.
    pub async fn generate_response_from_function_call(&self, call_id: &str, output: &Value) -> Result<()> {
        self.ensure_running()?;
        self.inner
            .service
            .create_conversation_item(OutboundItem::FunctionCallOutput {
                call_id: call_id.to_string(),
                output: output.to_string(),
            })
            .await?;
        self.request_response().await
    }

    // ---------------------------------------------------------------------
    // State
    // ---------------------------------------------------------------------

    pub fn options(&self) -> SessionOptions {
        self.inner.options.read().clone()
    }

    pub fn is_client_turn_detection(&self) -> bool {
        self.inner.options.read().is_client_turn_detection()
    }

    pub fn audio_output(&self) -> Option<&Arc<dyn AudioOutput>> {
        self.inner.audio_output.as_ref()
    }

    pub fn is_audio_playing(&self) -> bool {
        self.inner
            .audio_output
            .as_ref()
            .is_some_and(|output| output.is_audio_playing())
    }

    /// Record the item whose audio is being played, for truncation on barge-in.
    pub fn track_audio_item(&self, item_id: &str, content_index: u32) {
        let mut current = self.inner.current_audio.lock();
        if current
            .as_ref()
            .is_some_and(|c| c.item_id == item_id && c.content_index == content_index)
        {
            return;
        }
        *current = Some(AudioItemRef {
            item_id: item_id.to_string(),
            content_index,
        });
    }

    pub fn current_audio_item(&self) -> Option<AudioItemRef> {
        self.inner.current_audio.lock().clone()
    }

    pub fn service(&self) -> &ServiceManager {
        &self.inner.service
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<SessionStatusEvent> {
        self.inner.service.subscribe_status()
    }

    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        self.inner.service.diagnostics()
    }
}

async fn consume_events(client: RealtimeClient) {
    debug!("event consumption started");
    while client.is_running() {
        let Some(event) = client.inner.service.get_next_event(EVENT_POLL_TIMEOUT).await else {
            continue;
        };
        let event_type = event.event_type();
        let handler = client.inner.handler.clone();
        let task_client = client.clone();
        let task = tokio::spawn(async move { dispatch(handler.as_ref(), &task_client, &event).await });
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(event_type, error = %e, "event handler failed"),
            Err(e) if e.is_panic() => error!(event_type, "event handler panicked"),
            Err(_) => debug!(event_type, "event handler cancelled"),
        }
    }
    debug!("event consumption finished");
}

async fn stream_audio(client: RealtimeClient, mut commands: mpsc::UnboundedReceiver<AudioCommand>) {
    while let Some(command) = commands.recv().await {
        let result = match command {
            AudioCommand::Append(pcm) => client.inner.service.append_audio(&pcm).await.map(drop),
            AudioCommand::BargeIn => {
                info!("local speech during playback, interrupting");
                client.interrupt_response().await
            }
            AudioCommand::EndOfSpeech => client.generate_response(true).await,
        };
        if let Err(e) = result {
            warn!(error = %e, "audio stream command failed");
        }
    }
    debug!("audio streaming task finished");
}

struct ClientCaptureSink {
    client: RealtimeClient,
}

impl ClientCaptureSink {
    fn push(&self, command: AudioCommand) {
        if let Err(e) = self.client.push_audio_command(command) {
            debug!(error = %e, "capture output dropped");
        }
    }
}

impl CaptureSink for ClientCaptureSink {
    fn on_audio(&self, pcm: Vec<u8>) {
        self.push(AudioCommand::Append(pcm));
    }

    fn on_speech_started(&self) {
        if self.client.is_client_turn_detection() && self.client.is_audio_playing() {
            self.push(AudioCommand::BargeIn);
        }
    }

    fn on_speech_ended(&self) {
        if self.client.is_client_turn_detection() {
            self.push(AudioCommand::EndOfSpeech);
        }
    }
}
