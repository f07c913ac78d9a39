//! Event callbacks.
//!
//! [`EventHandler`] has one async callback per inbound event. Every callback
//! defaults to [`EventHandler::on_unhandled_event`], so an implementation only
//! overrides what it cares about. [`dispatch`] is the single exhaustive match
//! from [`Event`] to callback.

pub mod conversation;

pub use conversation::{
    BlockingExecutor, ConversationHandler, FunctionExecutor, OutputChunk, OutputSink,
};

use async_trait::async_trait;
use tracing::debug;

use crate::client::RealtimeClient;
use crate::error::Result;
use crate::protocol::inbound::*;

#[async_trait]
#[allow(unused_variables)]
pub trait EventHandler: Send + Sync + 'static {
    /// Fallback for every callback that is not overridden.
    async fn on_unhandled_event(
        &self,
        client: &RealtimeClient,
        event_type: &'static str,
        event_id: &str,
    ) -> Result<()> {
        debug!(event_type, event_id, "event not handled");
        Ok(())
    }

    async fn on_error(&self, client: &RealtimeClient, event: &ErrorEvent) -> Result<()> {
        self.on_unhandled_event(client, "error", &event.event_id).await
    }

    async fn on_session_created(
        &self,
        client: &RealtimeClient,
        event: &SessionCreatedEvent,
    ) -> Result<()> {
        self.on_unhandled_event(client, "session.created", &event.event_id)
            .await
    }

    async fn on_session_updated(
        &self,
        client: &RealtimeClient,
        event: &SessionUpdatedEvent,
    ) -> Result<()> {
        self.on_unhandled_event(client, "session.updated", &event.event_id)
            .await
    }

    async fn on_conversation_created(
        &self,
        client: &RealtimeClient,
        event: &ConversationCreatedEvent,
    ) -> Result<()> {
        self.on_unhandled_event(client, "conversation.created", &event.event_id)
            .await
    }

    async fn on_conversation_item_created(
        &self,
        client: &RealtimeClient,
        event: &ConversationItemCreatedEvent,
    ) -> Result<()> {
        self.on_unhandled_event(client, "conversation.item.created", &event.event_id)
            .await
    }

    async fn on_conversation_item_input_audio_transcription_completed(
        &self,
        client: &RealtimeClient,
        event: &InputAudioTranscriptionCompletedEvent,
    ) -> Result<()> {
        self.on_unhandled_event(
            client,
            "conversation.item.input_audio_transcription.completed",
            &event.event_id,
        )
        .await
    }

    async fn on_conversation_item_input_audio_transcription_failed(
        &self,
        client: &RealtimeClient,
        event: &InputAudioTranscriptionFailedEvent,
    ) -> Result<()> {
        self.on_unhandled_event(
            client,
            "conversation.item.input_audio_transcription.failed",
            &event.event_id,
        )
        .await
    }

    async fn on_conversation_item_truncated(
        &self,
        client: &RealtimeClient,
        event: &ConversationItemTruncatedEvent,
    ) -> Result<()> {
        self.on_unhandled_event(client, "conversation.item.truncated", &event.event_id)
            .await
    }

    async fn on_conversation_item_deleted(
        &self,
        client: &RealtimeClient,
        event: &ConversationItemDeletedEvent,
    ) -> Result<()> {
        self.on_unhandled_event(client, "conversation.item.deleted", &event.event_id)
            .await
    }

    async fn on_input_audio_buffer_committed(
        &self,
        client: &RealtimeClient,
        event: &InputAudioBufferCommittedEvent,
    ) -> Result<()> {
        self.on_unhandled_event(client, "input_audio_buffer.committed", &event.event_id)
            .await
    }

    async fn on_input_audio_buffer_cleared(
        &self,
        client: &RealtimeClient,
        event: &InputAudioBufferClearedEvent,
    ) -> Result<()> {
        self.on_unhandled_event(client, "input_audio_buffer.cleared", &event.event_id)
            .await
    }

    async fn on_input_audio_buffer_speech_started(
        &self,
        client: &RealtimeClient,
        event: &SpeechStartedEvent,
    ) -> Result<()> {
        self.on_unhandled_event(client, "input_audio_buffer.speech_started", &event.event_id)
            .await
    }

    async fn on_input_audio_buffer_speech_stopped(
        &self,
        client: &RealtimeClient,
        event: &SpeechStoppedEvent,
    ) -> Result<()> {
        self.on_unhandled_event(client, "input_audio_buffer.speech_stopped", &event.event_id)
            .await
    }

    async fn on_response_created(
        &self,
        client: &RealtimeClient,
        event: &ResponseCreatedEvent,
    ) -> Result<()> {
        self.on_unhandled_event(client, "response.created", &event.event_id)
            .await
    }

    async fn on_response_done(&self, client: &RealtimeClient, event: &ResponseDoneEvent) -> Result<()> {
        self.on_unhandled_event(client, "response.done", &event.event_id)
            .await
    }

    async fn on_response_output_item_added(
        &self,
        client: &RealtimeClient,
        event: &OutputItemAddedEvent,
    ) -> Result<()> {
        self.on_unhandled_event(client, "response.output_item.added", &event.event_id)
            .await
    }

    async fn on_response_output_item_done(
        &self,
        client: &RealtimeClient,
        event: &OutputItemDoneEvent,
    ) -> Result<()> {
        self.on_unhandled_event(client, "response.output_item.done", &event.event_id)
            .await
    }

    async fn on_response_content_part_added(
        &self,
        client: &RealtimeClient,
        event: &ContentPartAddedEvent,
    ) -> Result<()> {
        self.on_unhandled_event(client, "response.content_part.added", &event.event_id)
            .await
    }

    async fn on_response_content_part_done(
        &self,
        client: &RealtimeClient,
        event: &ContentPartDoneEvent,
    ) -> Result<()> {
        self.on_unhandled_event(client, "response.content_part.done", &event.event_id)
            .await
    }

    async fn on_response_text_delta(
        &self,
        client: &RealtimeClient,
        event: &TextDeltaEvent,
    ) -> Result<()> {
        self.on_unhandled_event(client, "response.text.delta", &event.event_id)
            .await
    }

    async fn on_response_text_done(&self, client: &RealtimeClient, event: &TextDoneEvent) -> Result<()> {
        self.on_unhandled_event(client, "response.text.done", &event.event_id)
            .await
    }

    async fn on_response_audio_transcript_delta(
        &self,
        client: &RealtimeClient,
        event: &AudioTranscriptDeltaEvent,
    ) -> Result<()> {
        self.on_unhandled_event(client, "response.audio_transcript.delta", &event.event_id)
            .await
    }

    async fn on_response_audio_transcript_done(
        &self,
        client: &RealtimeClient,
        event: &AudioTranscriptDoneEvent,
    ) -> Result<()> {
        self.on_unhandled_event(client, "response.audio_transcript.done", &event.event_id)
            .await
    }

    async fn on_response_audio_delta(
        &self,
        client: &RealtimeClient,
        event: &AudioDeltaEvent,
    ) -> Result<()> {
        self.on_unhandled_event(client, "response.audio.delta", &event.event_id)
            .await
    }

    async fn on_response_audio_done(&self, client: &RealtimeClient, event: &AudioDoneEvent) -> Result<()> {
        self.on_unhandled_event(client, "response.audio.done", &event.event_id)
            .await
    }

    async fn on_response_function_call_arguments_delta(
        &self,
        client: &RealtimeClient,
        event: &FunctionCallArgumentsDeltaEvent,
    ) -> Result<()> {
        self.on_unhandled_event(
            client,
            "response.function_call_arguments.delta",
            &event.event_id,
        )
        .await
    }

    async fn on_response_function_call_arguments_done(
        &self,
        client: &RealtimeClient,
        event: &FunctionCallArgumentsDoneEvent,
    ) -> Result<()> {
        self.on_unhandled_event(
            client,
            "response.function_call_arguments.done",
            &event.event_id,
        )
        .await
    }

    async fn on_rate_limits_updated(
        &self,
        client: &RealtimeClient,
        event: &RateLimitsUpdatedEvent,
    ) -> Result<()> {
        self.on_unhandled_event(client, "rate_limits.updated", &event.event_id)
            .await
    }
}

/// Route `event` to its callback on `handler`.
pub async fn dispatch(handler: &dyn EventHandler, client: &RealtimeClient, event: &Event) -> Result<()> {
    match event {
        Event::Error(e) => handler.on_error(client, e).await,
        Event::SessionCreated(e) => handler.on_session_created(client, e).await,
        Event::SessionUpdated(e) => handler.on_session_updated(client, e).await,
        Event::ConversationCreated(e) => handler.on_conversation_created(client, e).await,
        Event::ConversationItemCreated(e) => handler.on_conversation_item_created(client, e).await,
        Event::InputAudioTranscriptionCompleted(e) => {
            handler
                .on_conversation_item_input_audio_transcription_completed(client, e)
                .await
        }
        Event::InputAudioTranscriptionFailed(e) => {
            handler
                .on_conversation_item_input_audio_transcription_failed(client, e)
                .await
        }
        Event::ConversationItemTruncated(e) => handler.on_conversation_item_truncated(client, e).await,
        Event::ConversationItemDeleted(e) => handler.on_conversation_item_deleted(client, e).await,
        Event::InputAudioBufferCommitted(e) => handler.on_input_audio_buffer_committed(client, e).await,
        Event::InputAudioBufferCleared(e) => handler.on_input_audio_buffer_cleared(client, e).await,
        Event::InputAudioBufferSpeechStarted(e) => {
            handler.on_input_audio_buffer_speech_started(client, e).await
        }
        Event::InputAudioBufferSpeechStopped(e) => {
            handler.on_input_audio_buffer_speech_stopped(client, e).await
        }
        Event::ResponseCreated(e) => handler.on_response_created(client, e).await,
        Event::ResponseDone(e) => handler.on_response_done(client, e).await,
        Event::ResponseOutputItemAdded(e) => handler.on_response_output_item_added(client, e).await,
        Event::ResponseOutputItemDone(e) => handler.on_response_output_item_done(client, e).await,
        Event::ResponseContentPartAdded(e) => handler.on_response_content_part_added(client, e).await,
        Event::ResponseContentPartDone(e) => handler.on_response_content_part_done(client, e).await,
        Event::ResponseTextDelta(e) => handler.on_response_text_delta(client, e).await,
        Event::ResponseTextDone(e) => handler.on_response_text_done(client, e).await,
        Event::ResponseAudioTranscriptDelta(e) => {
            handler.on_response_audio_transcript_delta(client, e).await
        }
        Event::ResponseAudioTranscriptDone(e) => {
            handler.on_response_audio_transcript_done(client, e).await
        }
        Event::ResponseAudioDelta(e) => handler.on_response_audio_delta(client, e).await,
        Event::ResponseAudioDone(e) => handler.on_response_audio_done(client, e).await,
        Event::ResponseFunctionCallArgumentsDelta(e) => {
            handler
                .on_response_function_call_arguments_delta(client, e)
                .await
        }
        Event::ResponseFunctionCallArgumentsDone(e) => {
            handler
                .on_response_function_call_arguments_done(client, e)
                .await
        }
        Event::RateLimitsUpdated(e) => handler.on_rate_limits_updated(client, e).await,
    }
}
