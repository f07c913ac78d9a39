//! PCM framing between f32 device samples and the PCM16 LE wire format.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Shape of the PCM stream exchanged with the service.
///
/// Fixed for the lifetime of a capture/playback pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioStreamOptions {
    pub sample_rate: u32,
    pub channels: u16,
    pub bytes_per_sample: u16,
}

impl Default for AudioStreamOptions {
    /// 24 kHz mono PCM16, the realtime service's `pcm16` format.
    fn default() -> Self {
        Self {
            sample_rate: 24_000,
            channels: 1,
            bytes_per_sample: 2,
        }
    }
}

impl AudioStreamOptions {
    pub fn bytes_per_frame(&self) -> usize {
        self.channels.max(1) as usize * self.bytes_per_sample.max(1) as usize
    }

    /// Byte length of `duration` of audio, rounded down to whole frames.
    pub fn bytes_for(&self, duration: Duration) -> usize {
        let frames = (duration.as_secs_f64() * self.sample_rate as f64) as usize;
        frames * self.bytes_per_frame()
    }

    /// Playback duration of `bytes` of audio.
    pub fn duration_of(&self, bytes: usize) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        let frames = bytes / self.bytes_per_frame();
        Duration::from_secs_f64(frames as f64 / self.sample_rate as f64)
    }
}

/// Encode mono f32 samples as PCM16 little-endian bytes (clamped).
pub fn f32_to_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for s in samples {
        let v = (s.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16;
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

/// Decode PCM16 little-endian bytes into f32 samples. A trailing odd byte is ignored.
pub fn pcm16_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0)
        .collect()
}

/// Average interleaved frames down to mono.
pub fn downmix_to_mono(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}
