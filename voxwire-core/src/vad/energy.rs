//! Energy-based VAD using an adaptive RMS noise floor.
//!
//! ## Algorithm
//!
//! 1. Compute RMS of the incoming chunk.
//! 2. The first `window_size` chunks only fill the noise window; no
//!    transitions fire until it is full.
//! 3. Threshold = mean(noise window) × `silence_ratio`. A chunk is a speech
//!    frame if its RMS exceeds the threshold.
//! 4. Frame decisions go through [`Hysteresis`]. Non-speech frames observed
//!    outside speech keep rolling the noise window forward.

use std::collections::VecDeque;

use super::{Hysteresis, VadTransition, VoiceActivityDetector};
use crate::buffering::chunk::AudioChunk;
use crate::error::Result;

/// Lower bound for the noise estimate so digital silence does not make every
/// non-zero sample count as speech.
const MIN_NOISE_FLOOR: f32 = 1e-4;

/// Tuning for [`EnergyVad`].
#[derive(Debug, Clone, Copy)]
pub struct EnergyVadConfig {
    /// Number of chunks averaged for the noise floor.
    pub window_size: usize,
    /// Multiplier applied to the noise floor. Default: `3.0`.
    pub silence_ratio: f32,
    /// Consecutive speech chunks required to enter speech. Default: `3`.
    pub min_speech_frames: u32,
    /// Consecutive non-speech chunks required to leave speech. Default: `25`
    /// (≈ 500 ms at a 20 ms chunk stride).
    pub min_silence_frames: u32,
}

impl Default for EnergyVadConfig {
    fn default() -> Self {
        Self {
            window_size: 25,
            silence_ratio: 3.0,
            min_speech_frames: 3,
            min_silence_frames: 25,
        }
    }
}

/// RMS-threshold voice activity detector with a learned noise floor.
#[derive(Debug, Clone)]
pub struct EnergyVad {
    config: EnergyVadConfig,
    noise_window: VecDeque<f32>,
    hysteresis: Hysteresis,
}

impl EnergyVad {
    pub fn new(config: EnergyVadConfig) -> Self {
        let config = EnergyVadConfig {
            window_size: config.window_size.max(1),
            ..config
        };
        Self {
            noise_window: VecDeque::with_capacity(config.window_size),
            hysteresis: Hysteresis::new(config.min_speech_frames, config.min_silence_frames),
            config,
        }
    }

    /// Mean RMS of the noise window, or `None` while it is still filling.
    pub fn noise_floor(&self) -> Option<f32> {
        if self.noise_window.len() < self.config.window_size {
            return None;
        }
        let sum: f32 = self.noise_window.iter().sum();
        Some((sum / self.noise_window.len() as f32).max(MIN_NOISE_FLOOR))
    }

    /// Current dynamic threshold, once the noise window is full.
    pub fn threshold(&self) -> Option<f32> {
        self.noise_floor().map(|n| n * self.config.silence_ratio)
    }

    fn push_noise(&mut self, rms: f32) {
        if self.noise_window.len() == self.config.window_size {
            self.noise_window.pop_front();
        }
        self.noise_window.push_back(rms);
    }
}

impl Default for EnergyVad {
    fn default() -> Self {
        Self::new(EnergyVadConfig::default())
    }
}

impl VoiceActivityDetector for EnergyVad {
    fn process_chunk(&mut self, chunk: &AudioChunk) -> Result<VadTransition> {
        let rms = chunk.rms();

        let Some(threshold) = self.threshold() else {
            self.push_noise(rms);
            return Ok(self.hysteresis.current());
        };

        let frame_is_speech = rms > threshold;
        if !frame_is_speech && !self.hysteresis.is_speech() {
            self.push_noise(rms);
        }
        Ok(self.hysteresis.update(frame_is_speech))
    }

    fn reset(&mut self) {
        self.noise_window.clear();
        self.hysteresis.reset();
    }
}
