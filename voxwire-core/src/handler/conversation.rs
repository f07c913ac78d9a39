//! Default conversation behaviour: output routing, barge-in on server VAD and
//! the function-call cycle.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use base64::prelude::{Engine as _, BASE64_STANDARD};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use super::EventHandler;
use crate::client::RealtimeClient;
use crate::error::{RealtimeError, Result};
use crate::protocol::inbound::*;
use crate::protocol::Role;

/// Service error code returned when a cancel arrives after the response ended.
const CANCEL_NOT_ACTIVE: &str = "response_cancel_not_active";

/// Decoded output handed to the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputChunk {
    Text(String),
    /// Spoken-text transcript (assistant audio or user input).
    Transcript(String),
    /// PCM in the session's output format. Only emitted when no audio output
    /// is attached to the client.
    Audio(Vec<u8>),
}

/// Where decoded output goes.
pub trait OutputSink: Send + Sync + 'static {
    fn emit(&self, role: Role, chunk: OutputChunk);
    fn error(&self, message: &str);
    fn response_done(&self, _response_id: &str, _status: &str) {}
}

/// Runs a declared tool: `name` plus parsed JSON arguments to a JSON result.
#[async_trait]
pub trait FunctionExecutor: Send + Sync + 'static {
    async fn execute(&self, name: &str, arguments: Value) -> anyhow::Result<Value>;
}

/// Adapts a synchronous function to [`FunctionExecutor`] via `spawn_blocking`.
pub struct BlockingExecutor<F> {
    func: Arc<F>,
}

impl<F> BlockingExecutor<F>
where
    F: Fn(&str, Value) -> anyhow::Result<Value> + Send + Sync + 'static,
{
    pub fn new(func: F) -> Self {
        Self {
            func: Arc::new(func),
        }
    }
}

#[async_trait]
impl<F> FunctionExecutor for BlockingExecutor<F>
where
    F: Fn(&str, Value) -> anyhow::Result<Value> + Send + Sync + 'static,
{
    async fn execute(&self, name: &str, arguments: Value) -> anyhow::Result<Value> {
        let func = self.func.clone();
        let name = name.to_string();
        tokio::task::spawn_blocking(move || func(&name, arguments)).await?
    }
}

/// Function calls announced by `response.output_item.added`, keyed by
/// `(response_id, call_id)`.
type PendingCalls = HashMap<(String, String), String>;

pub struct ConversationHandler {
    sink: Arc<dyn OutputSink>,
    executor: Option<Arc<dyn FunctionExecutor>>,
    pending: Mutex<PendingCalls>,
}

impl ConversationHandler {
    pub fn new(sink: Arc<dyn OutputSink>) -> Self {
        Self {
            sink,
            executor: None,
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_executor(mut self, executor: Arc<dyn FunctionExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Function calls announced but not yet completed.
    pub fn pending_calls(&self) -> usize {
        self.pending.lock().len()
    }
}

#[async_trait]
impl EventHandler for ConversationHandler {
    async fn on_error(&self, _client: &RealtimeClient, event: &ErrorEvent) -> Result<()> {
        let detail = &event.error;
        if detail.code.as_deref() == Some(CANCEL_NOT_ACTIVE) {
            debug!("cancel arrived after response finished");
            return Ok(());
        }
        warn!(
            kind = %detail.kind,
            code = detail.code.as_deref().unwrap_or(""),
            message = %detail.message,
            "service error"
        );
        let message = match &detail.code {
            Some(code) => format!("{} [{code}]: {}", detail.kind, detail.message),
            None => format!("{}: {}", detail.kind, detail.message),
        };
        self.sink.error(&message);
        Ok(())
    }

    async fn on_session_created(
        &self,
        _client: &RealtimeClient,
        event: &SessionCreatedEvent,
    ) -> Result<()> {
        let id = event.session.get("id").and_then(Value::as_str).unwrap_or("");
        info!(session_id = id, "session created");
        Ok(())
    }

    async fn on_session_updated(
        &self,
        _client: &RealtimeClient,
        event: &SessionUpdatedEvent,
    ) -> Result<()> {
        debug!(event_id = %event.event_id, "session updated");
        Ok(())
    }

    async fn on_conversation_created(
        &self,
        _client: &RealtimeClient,
        event: &ConversationCreatedEvent,
    ) -> Result<()> {
        let id = event.conversation.get("id").and_then(Value::as_str).unwrap_or("");
        debug!(conversation_id = id, "conversation created");
        Ok(())
    }

    async fn on_conversation_item_created(
        &self,
        _client: &RealtimeClient,
        event: &ConversationItemCreatedEvent,
    ) -> Result<()> {
        debug!(item_id = %event.item.id, kind = %event.item.kind, "item created");
        Ok(())
    }

    async fn on_conversation_item_input_audio_transcription_completed(
        &self,
        _client: &RealtimeClient,
        event: &InputAudioTranscriptionCompletedEvent,
    ) -> Result<()> {
        self.sink
            .emit(Role::User, OutputChunk::Transcript(event.transcript.clone()));
        Ok(())
    }

    async fn on_conversation_item_input_audio_transcription_failed(
        &self,
        _client: &RealtimeClient,
        event: &InputAudioTranscriptionFailedEvent,
    ) -> Result<()> {
        warn!(item_id = %event.item_id, message = %event.error.message, "input transcription failed");
        Ok(())
    }

    async fn on_conversation_item_truncated(
        &self,
        _client: &RealtimeClient,
        event: &ConversationItemTruncatedEvent,
    ) -> Result<()> {
        debug!(item_id = %event.item_id, audio_end_ms = event.audio_end_ms, "item truncated");
        Ok(())
    }

    async fn on_conversation_item_deleted(
        &self,
        _client: &RealtimeClient,
        event: &ConversationItemDeletedEvent,
    ) -> Result<()> {
        debug!(item_id = %event.item_id, "item deleted");
        Ok(())
    }

    async fn on_input_audio_buffer_committed(
        &self,
        _client: &RealtimeClient,
        event: &InputAudioBufferCommittedEvent,
    ) -> Result<()> {
        debug!(item_id = %event.item_id, "input committed");
        Ok(())
    }

    async fn on_input_audio_buffer_cleared(
        &self,
        _client: &RealtimeClient,
        _event: &InputAudioBufferClearedEvent,
    ) -> Result<()> {
        debug!("input cleared");
        Ok(())
    }

    async fn on_input_audio_buffer_speech_started(
        &self,
        client: &RealtimeClient,
        event: &SpeechStartedEvent,
    ) -> Result<()> {
        if client.is_client_turn_detection() {
            // Local capture already ran the barge-in.
            debug!(audio_start_ms = event.audio_start_ms, "speech started (informational)");
            return Ok(());
        }
        info!(audio_start_ms = event.audio_start_ms, "server detected speech, interrupting");
        client.interrupt_response().await
    }

    async fn on_input_audio_buffer_speech_stopped(
        &self,
        _client: &RealtimeClient,
        event: &SpeechStoppedEvent,
    ) -> Result<()> {
        debug!(audio_end_ms = event.audio_end_ms, "speech stopped");
        Ok(())
    }

    async fn on_response_created(
        &self,
        _client: &RealtimeClient,
        event: &ResponseCreatedEvent,
    ) -> Result<()> {
        debug!(response_id = %event.response.id, "response created");
        Ok(())
    }

    async fn on_response_done(&self, _client: &RealtimeClient, event: &ResponseDoneEvent) -> Result<()> {
        let response = &event.response;
        let abandoned = {
            let mut pending = self.pending.lock();
            let before = pending.len();
            pending.retain(|(response_id, _), _| response_id != &response.id);
            before - pending.len()
        };
        if abandoned > 0 {
            warn!(response_id = %response.id, abandoned, "response ended with unfinished function calls");
        }
        if response.status == "failed" {
            warn!(response_id = %response.id, details = ?response.status_details, "response failed");
        }
        self.sink.response_done(&response.id, &response.status);
        Ok(())
    }

    async fn on_response_output_item_added(
        &self,
        _client: &RealtimeClient,
        event: &OutputItemAddedEvent,
    ) -> Result<()> {
        let item = &event.item;
        if !item.is_function_call() {
            return Ok(());
        }
        let (Some(call_id), Some(name)) = (&item.call_id, &item.name) else {
            warn!(item_id = %item.id, "function call item without call id or name");
            return Ok(());
        };
        debug!(call_id = %call_id, name = %name, "tracking function call");
        self.pending
            .lock()
            .insert((event.response_id.clone(), call_id.clone()), name.clone());
        Ok(())
    }

    async fn on_response_output_item_done(
        &self,
        _client: &RealtimeClient,
        event: &OutputItemDoneEvent,
    ) -> Result<()> {
        debug!(item_id = %event.item.id, "output item done");
        Ok(())
    }

    async fn on_response_content_part_added(
        &self,
        _client: &RealtimeClient,
        event: &ContentPartAddedEvent,
    ) -> Result<()> {
        debug!(item_id = %event.item_id, part = %event.part.kind, "content part added");
        Ok(())
    }

    async fn on_response_content_part_done(
        &self,
        _client: &RealtimeClient,
        event: &ContentPartDoneEvent,
    ) -> Result<()> {
        debug!(item_id = %event.item_id, part = %event.part.kind, "content part done");
        Ok(())
    }

    async fn on_response_text_delta(
        &self,
        _client: &RealtimeClient,
        event: &TextDeltaEvent,
    ) -> Result<()> {
        self.sink
            .emit(Role::Assistant, OutputChunk::Text(event.delta.clone()));
        Ok(())
    }

    async fn on_response_text_done(&self, _client: &RealtimeClient, event: &TextDoneEvent) -> Result<()> {
        debug!(item_id = %event.item_id, chars = event.text.len(), "text done");
        Ok(())
    }

    async fn on_response_audio_transcript_delta(
        &self,
        _client: &RealtimeClient,
        event: &AudioTranscriptDeltaEvent,
    ) -> Result<()> {
        self.sink
            .emit(Role::Assistant, OutputChunk::Transcript(event.delta.clone()));
        Ok(())
    }

    async fn on_response_audio_transcript_done(
        &self,
        _client: &RealtimeClient,
        event: &AudioTranscriptDoneEvent,
    ) -> Result<()> {
        debug!(item_id = %event.item_id, "transcript done");
        Ok(())
    }

    async fn on_response_audio_delta(
        &self,
        client: &RealtimeClient,
        event: &AudioDeltaEvent,
    ) -> Result<()> {
        let pcm = BASE64_STANDARD
            .decode(&event.delta)
            .map_err(|e| RealtimeError::Protocol(format!("audio delta is not base64: {e}")))?;
        client.track_audio_item(&event.item_id, event.content_index);
        match client.audio_output() {
            Some(output) => output.enqueue(pcm),
            None => self.sink.emit(Role::Assistant, OutputChunk::Audio(pcm)),
        }
        Ok(())
    }

    async fn on_response_audio_done(&self, _client: &RealtimeClient, event: &AudioDoneEvent) -> Result<()> {
        debug!(item_id = %event.item_id, "audio done");
        Ok(())
    }

    async fn on_response_function_call_arguments_delta(
        &self,
        _client: &RealtimeClient,
        _event: &FunctionCallArgumentsDeltaEvent,
    ) -> Result<()> {
        Ok(())
    }

    async fn on_response_function_call_arguments_done(
        &self,
        client: &RealtimeClient,
        event: &FunctionCallArgumentsDoneEvent,
    ) -> Result<()> {
        let key = (event.response_id.clone(), event.call_id.clone());
        let name = self.pending.lock().remove(&key);
        let Some(name) = name else {
            warn!(
                response_id = %event.response_id,
                call_id = %event.call_id,
                "arguments done for an unregistered function call, ignoring"
            );
            return Ok(());
        };
        let Some(executor) = self.executor.clone() else {
            warn!(name = %name, "function call requested but no executor is configured");
            return Ok(());
        };
        let arguments: Value = match serde_json::from_str(&event.arguments) {
            Ok(v) => v,
            Err(e) => {
                error!(name = %name, error = %e, "function arguments are not valid JSON, abandoning call");
                return Ok(());
            }
        };

        let client = client.clone();
        let call_id = event.call_id.clone();
        tokio::spawn(async move {
            info!(name = %name, call_id = %call_id, "executing function");
            match executor.execute(&name, arguments).await {
                Ok(output) => {
                    if let Err(e) = client
                        .generate_response_from_function_call(&call_id, &output)
                        .await
                    {
                        error!(call_id = %call_id, error = %e, "failed to send function output");
                    }
                }
                Err(e) => {
                    error!(name = %name, call_id = %call_id, error = %e, "function execution failed, abandoning call");
                }
            }
        });
        Ok(())
    }

    async fn on_rate_limits_updated(
        &self,
        _client: &RealtimeClient,
        event: &RateLimitsUpdatedEvent,
    ) -> Result<()> {
        for limit in &event.rate_limits {
            debug!(name = %limit.name, remaining = limit.remaining, limit = limit.limit, "rate limit");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn blocking_executor_runs_off_thread() {
        let exec = BlockingExecutor::new(|name: &str, args: Value| {
            Ok(json!({ "name": name, "echo": args["x"] }))
        });
        let out = exec.execute("echo", json!({"x": 7})).await.unwrap();
        assert_eq!(out, json!({"name": "echo", "echo": 7}));
    }

    #[tokio::test]
    async fn blocking_executor_propagates_errors() {
        let exec = BlockingExecutor::new(|_: &str, _: Value| Err(anyhow::anyhow!("boom")));
        let err = exec.execute("f", Value::Null).await.unwrap_err();
        assert!(err.to_string().contains("boom"));
    }
}
