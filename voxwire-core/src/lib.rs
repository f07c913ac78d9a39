//! # voxwire-core
//!
//! Realtime speech/text client: a full-duplex session with a remote
//! generation service, microphone audio up, synthesized audio and text down.
//!
//! ## Architecture
//!
//! ```text
//! Microphone → AudioCapture (VAD, pre-roll) → RealtimeClient::send_audio
//!                                                   │
//!                                  ServiceManager → Connection (WebSocket)
//!                                                   │
//!             inbound frame → parse_event → EventQueue → consumption loop
//!                                                   │
//!                                     EventHandler::dispatch
//!                     ┌─────────────────────┼─────────────────────┐
//!               AudioPlayback          OutputSink          FunctionExecutor
//! ```
//!
//! The capture and playback callbacks never touch the async runtime; they
//! exchange audio with their worker threads through lock-free rings.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod client;
pub mod config;
pub mod error;
pub mod handler;
pub mod protocol;
pub mod service;
pub mod status;
pub mod vad;

// Convenience re-exports for downstream crates
pub use audio::{
    AudioCapture, AudioOutput, AudioPlayback, AudioStreamOptions, CaptureConfig, CaptureSink,
    PlaybackConfig,
};
pub use client::{ClientBuilder, RealtimeClient};
pub use config::ClientConfig;
pub use error::{RealtimeError, Result};
pub use handler::{
    BlockingExecutor, ConversationHandler, EventHandler, FunctionExecutor, OutputChunk, OutputSink,
};
pub use protocol::{ConnectionTarget, Event, Role, SessionOptions};
pub use service::{ReconnectPolicy, ServiceManager};
pub use status::{AudioActivityEvent, SessionStatus, SessionStatusEvent};
pub use vad::{EnergyVad, VoiceActivityDetector};

#[cfg(feature = "onnx")]
pub use vad::NeuralVad;
