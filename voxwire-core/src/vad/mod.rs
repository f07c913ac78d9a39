//! Voice Activity Detection (VAD) strategies.
//!
//! Both detectors classify a chunk as speech/non-speech and pass the result
//! through the same [`Hysteresis`] counters, so callers only ever see debounced
//! speech/silence *transitions*:
//!
//! - [`energy::EnergyVad`]: RMS against an adaptive noise floor.
//! - `neural::NeuralVad` (feature `onnx`): recurrent classifier probability.

pub mod energy;

#[cfg(feature = "onnx")]
pub mod neural;

#[cfg(feature = "onnx")]
pub use neural::NeuralVad;

pub use energy::EnergyVad;

use crate::buffering::chunk::AudioChunk;
use crate::error::Result;

/// Outcome of feeding one chunk to a detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VadTransition {
    /// `true` when this chunk flipped the speech state.
    pub transitioned: bool,
    /// Speech state after this chunk.
    pub is_speech: bool,
}

impl VadTransition {
    pub fn speech_started(self) -> bool {
        self.transitioned && self.is_speech
    }

    pub fn speech_ended(self) -> bool {
        self.transitioned && !self.is_speech
    }
}

/// Trait for all VAD implementations.
///
/// Implementors are stateful (noise windows, hysteresis counters, RNN hidden
/// states) and are driven from a single capture thread.
pub trait VoiceActivityDetector: Send + 'static {
    /// Classify a chunk and report whether the speech state changed.
    ///
    /// # Errors
    /// Implementation failures (e.g. inference errors). Capture treats an
    /// error as "not speech" for that chunk and keeps running.
    fn process_chunk(&mut self, chunk: &AudioChunk) -> Result<VadTransition>;

    /// Clear counters and any carried model state.
    fn reset(&mut self);
}

/// Debounce counters shared by all detectors.
///
/// Entering speech needs `min_speech_frames` consecutive positive frames,
/// leaving it needs `min_silence_frames` consecutive negative frames.
#[derive(Debug, Clone)]
pub struct Hysteresis {
    min_speech_frames: u32,
    min_silence_frames: u32,
    speech_run: u32,
    silence_run: u32,
    in_speech: bool,
}

impl Hysteresis {
    pub fn new(min_speech_frames: u32, min_silence_frames: u32) -> Self {
        Self {
            min_speech_frames: min_speech_frames.max(1),
            min_silence_frames: min_silence_frames.max(1),
            speech_run: 0,
            silence_run: 0,
            in_speech: false,
        }
    }

    /// Feed one raw frame decision.
    pub fn update(&mut self, frame_is_speech: bool) -> VadTransition {
        if frame_is_speech {
            self.speech_run = self.speech_run.saturating_add(1);
            self.silence_run = 0;
        } else {
            self.silence_run = self.silence_run.saturating_add(1);
            self.speech_run = 0;
        }

        let transitioned = if !self.in_speech && self.speech_run >= self.min_speech_frames {
            self.in_speech = true;
            true
        } else if self.in_speech && self.silence_run >= self.min_silence_frames {
            self.in_speech = false;
            true
        } else {
            false
        };

        VadTransition {
            transitioned,
            is_speech: self.in_speech,
        }
    }

    /// Current state without consuming a frame.
    pub fn current(&self) -> VadTransition {
        VadTransition {
            transitioned: false,
            is_speech: self.in_speech,
        }
    }

    pub fn is_speech(&self) -> bool {
        self.in_speech
    }

    pub fn reset(&mut self) {
        self.speech_run = 0;
        self.silence_run = 0;
        self.in_speech = false;
    }
}
