//! Inbound events and the allow-list parser.
//!
//! Each `type` string maps to one [`Event`] variant wrapping an immutable
//! payload struct. Payload fields default when absent, so a frame only fails
//! to parse when a field has the wrong JSON type. Unknown `type` strings and
//! malformed frames are logged and dropped; they never reach the handler.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use super::generate_event_id;

// ---------------------------------------------------------------------------
// Shared sub-objects
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorDetail {
    #[serde(rename = "type")]
    pub kind: String,
    pub code: Option<String>,
    pub message: String,
    pub param: Option<String>,
    /// Id of the client event that caused the error, if any.
    pub event_id: Option<String>,
}

/// A conversation item as reported by the service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Item {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub status: Option<String>,
    pub role: Option<String>,
    pub call_id: Option<String>,
    pub name: Option<String>,
    pub arguments: Option<String>,
    pub output: Option<String>,
    pub content: Vec<ContentPart>,
}

impl Item {
    pub fn is_function_call(&self) -> bool {
        self.kind == "function_call"
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentPart {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: Option<String>,
    pub audio: Option<String>,
    pub transcript: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponseInfo {
    pub id: String,
    pub status: String,
    pub status_details: Option<Value>,
    pub output: Vec<Item>,
    pub usage: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimit {
    pub name: String,
    pub limit: u64,
    pub remaining: u64,
    pub reset_seconds: f64,
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorEvent {
    pub event_id: String,
    pub error: ErrorDetail,
}

impl ErrorEvent {
    /// Locally generated error (not sent by the service).
    pub fn local(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            event_id: generate_event_id(),
            error: ErrorDetail {
                kind: kind.into(),
                message: message.into(),
                ..ErrorDetail::default()
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionCreatedEvent {
    pub event_id: String,
    pub session: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionUpdatedEvent {
    pub event_id: String,
    pub session: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationCreatedEvent {
    pub event_id: String,
    pub conversation: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationItemCreatedEvent {
    pub event_id: String,
    pub previous_item_id: Option<String>,
    pub item: Item,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputAudioTranscriptionCompletedEvent {
    pub event_id: String,
    pub item_id: String,
    pub content_index: u32,
    pub transcript: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputAudioTranscriptionFailedEvent {
    pub event_id: String,
    pub item_id: String,
    pub content_index: u32,
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationItemTruncatedEvent {
    pub event_id: String,
    pub item_id: String,
    pub content_index: u32,
    pub audio_end_ms: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationItemDeletedEvent {
    pub event_id: String,
    pub item_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputAudioBufferCommittedEvent {
    pub event_id: String,
    pub previous_item_id: Option<String>,
    pub item_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputAudioBufferClearedEvent {
    pub event_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechStartedEvent {
    pub event_id: String,
    pub audio_start_ms: u32,
    pub item_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechStoppedEvent {
    pub event_id: String,
    pub audio_end_ms: u32,
    pub item_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponseCreatedEvent {
    pub event_id: String,
    pub response: ResponseInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponseDoneEvent {
    pub event_id: String,
    pub response: ResponseInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputItemAddedEvent {
    pub event_id: String,
    pub response_id: String,
    pub output_index: u32,
    pub item: Item,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputItemDoneEvent {
    pub event_id: String,
    pub response_id: String,
    pub output_index: u32,
    pub item: Item,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentPartAddedEvent {
    pub event_id: String,
    pub response_id: String,
    pub item_id: String,
    pub output_index: u32,
    pub content_index: u32,
    pub part: ContentPart,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentPartDoneEvent {
    pub event_id: String,
    pub response_id: String,
    pub item_id: String,
    pub output_index: u32,
    pub content_index: u32,
    pub part: ContentPart,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextDeltaEvent {
    pub event_id: String,
    pub response_id: String,
    pub item_id: String,
    pub output_index: u32,
    pub content_index: u32,
    pub delta: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextDoneEvent {
    pub event_id: String,
    pub response_id: String,
    pub item_id: String,
    pub output_index: u32,
    pub content_index: u32,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioTranscriptDeltaEvent {
    pub event_id: String,
    pub response_id: String,
    pub item_id: String,
    pub output_index: u32,
    pub content_index: u32,
    pub delta: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioTranscriptDoneEvent {
    pub event_id: String,
    pub response_id: String,
    pub item_id: String,
    pub output_index: u32,
    pub content_index: u32,
    pub transcript: String,
}

/// `delta` is base64 PCM in the session's output format.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioDeltaEvent {
    pub event_id: String,
    pub response_id: String,
    pub item_id: String,
    pub output_index: u32,
    pub content_index: u32,
    pub delta: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioDoneEvent {
    pub event_id: String,
    pub response_id: String,
    pub item_id: String,
    pub output_index: u32,
    pub content_index: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FunctionCallArgumentsDeltaEvent {
    pub event_id: String,
    pub response_id: String,
    pub item_id: String,
    pub output_index: u32,
    pub call_id: String,
    pub delta: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FunctionCallArgumentsDoneEvent {
    pub event_id: String,
    pub response_id: String,
    pub item_id: String,
    pub output_index: u32,
    pub call_id: String,
    /// JSON-encoded arguments object.
    pub arguments: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitsUpdatedEvent {
    pub event_id: String,
    pub rate_limits: Vec<RateLimit>,
}

// ---------------------------------------------------------------------------
// Event union
// ---------------------------------------------------------------------------

macro_rules! inbound_events {
    ($( $variant:ident($payload:ident) => $wire:literal, )+) => {
        /// One parsed inbound protocol message.
        #[derive(Debug, Clone, PartialEq, Serialize)]
        #[serde(tag = "type")]
        pub enum Event {
            $(
                #[serde(rename = $wire)]
                $variant($payload),
            )+
        }

        /// Every inbound `type` the parser accepts.
        pub const KNOWN_EVENT_TYPES: &[&str] = &[$($wire),+];

        impl Event {
            /// Dotted wire `type` of this event.
            pub fn event_type(&self) -> &'static str {
                match self {
                    $( Event::$variant(_) => $wire, )+
                }
            }

            pub fn event_id(&self) -> &str {
                match self {
                    $( Event::$variant(e) => &e.event_id, )+
                }
            }
        }

        /// Build the [`Event`] for `event_type` from its JSON payload.
        ///
        /// Returns `None` (after logging) for unknown types and payloads that do
        /// not fit the variant.
        pub fn parse_event(event_type: &str, payload: Value) -> Option<Event> {
            let parsed = match event_type {
                $( $wire => serde_json::from_value::<$payload>(payload).map(Event::$variant), )+
                other => {
                    warn!(event_type = other, "dropping unknown event type");
                    return None;
                }
            };
            match parsed {
                Ok(event) => Some(event),
                Err(e) => {
                    warn!(event_type, error = %e, "dropping malformed event");
                    None
                }
            }
        }
    };
}

inbound_events! {
    Error(ErrorEvent) => "error",
    SessionCreated(SessionCreatedEvent) => "session.created",
    SessionUpdated(SessionUpdatedEvent) => "session.updated",
    ConversationCreated(ConversationCreatedEvent) => "conversation.created",
    ConversationItemCreated(ConversationItemCreatedEvent) => "conversation.item.created",
    InputAudioTranscriptionCompleted(InputAudioTranscriptionCompletedEvent) => "conversation.item.input_audio_transcription.completed",
    InputAudioTranscriptionFailed(InputAudioTranscriptionFailedEvent) => "conversation.item.input_audio_transcription.failed",
    ConversationItemTruncated(ConversationItemTruncatedEvent) => "conversation.item.truncated",
    ConversationItemDeleted(ConversationItemDeletedEvent) => "conversation.item.deleted",
    InputAudioBufferCommitted(InputAudioBufferCommittedEvent) => "input_audio_buffer.committed",
    InputAudioBufferCleared(InputAudioBufferClearedEvent) => "input_audio_buffer.cleared",
    InputAudioBufferSpeechStarted(SpeechStartedEvent) => "input_audio_buffer.speech_started",
    InputAudioBufferSpeechStopped(SpeechStoppedEvent) => "input_audio_buffer.speech_stopped",
    ResponseCreated(ResponseCreatedEvent) => "response.created",
    ResponseDone(ResponseDoneEvent) => "response.done",
    ResponseOutputItemAdded(OutputItemAddedEvent) => "response.output_item.added",
    ResponseOutputItemDone(OutputItemDoneEvent) => "response.output_item.done",
    ResponseContentPartAdded(ContentPartAddedEvent) => "response.content_part.added",
    ResponseContentPartDone(ContentPartDoneEvent) => "response.content_part.done",
    ResponseTextDelta(TextDeltaEvent) => "response.text.delta",
    ResponseTextDone(TextDoneEvent) => "response.text.done",
    ResponseAudioTranscriptDelta(AudioTranscriptDeltaEvent) => "response.audio_transcript.delta",
    ResponseAudioTranscriptDone(AudioTranscriptDoneEvent) => "response.audio_transcript.done",
    ResponseAudioDelta(AudioDeltaEvent) => "response.audio.delta",
    ResponseAudioDone(AudioDoneEvent) => "response.audio.done",
    ResponseFunctionCallArgumentsDelta(FunctionCallArgumentsDeltaEvent) => "response.function_call_arguments.delta",
    ResponseFunctionCallArgumentsDone(FunctionCallArgumentsDoneEvent) => "response.function_call_arguments.done",
    RateLimitsUpdated(RateLimitsUpdatedEvent) => "rate_limits.updated",
}

/// Parse a raw text frame: JSON object with a string `type`.
pub fn parse_frame(raw: &str) -> Option<Event> {
    let payload: Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "dropping non-JSON frame");
            return None;
        }
    };
    let Some(event_type) = payload.get("type").and_then(Value::as_str).map(str::to_owned) else {
        warn!("dropping frame without a type");
        return None;
    };
    parse_event(&event_type, payload)
}
