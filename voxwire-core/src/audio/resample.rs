//! Sample-rate conversion using a rubato `FastFixedIn` resampler.
//!
//! Devices run at their native rate (commonly 44.1/48 kHz) while the session
//! streams 24 kHz PCM and the neural VAD wants 16 kHz. `RateConverter` sits on
//! the worker threads, never inside a device callback.
//!
//! When both rates match the converter is a passthrough and no rubato state
//! is created.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::error;

use crate::error::{RealtimeError, Result};

/// Converts mono f32 audio between two fixed sample rates.
pub struct RateConverter {
    /// `None` in passthrough mode.
    resampler: Option<FastFixedIn<f32>>,
    /// Holds partial input between calls.
    input_buf: Vec<f32>,
    chunk_size: usize,
    output_buf: Vec<Vec<f32>>,
}

impl RateConverter {
    /// # Parameters
    /// - `from_rate`: rate of incoming samples (Hz).
    /// - `to_rate`: rate of produced samples (Hz).
    /// - `chunk_size`: input frames per rubato call (e.g. `480`).
    ///
    /// # Errors
    /// `RealtimeError::AudioStream` if rubato rejects the parameters.
    pub fn new(from_rate: u32, to_rate: u32, chunk_size: usize) -> Result<Self> {
        if from_rate == to_rate {
            return Ok(Self {
                resampler: None,
                input_buf: Vec::new(),
                chunk_size,
                output_buf: Vec::new(),
            });
        }
        if from_rate == 0 || to_rate == 0 {
            return Err(RealtimeError::AudioStream(format!(
                "invalid resample rates {from_rate} -> {to_rate}"
            )));
        }

        let resampler = FastFixedIn::<f32>::new(
            to_rate as f64 / from_rate as f64,
            1.0,
            PolynomialDegree::Cubic,
            chunk_size,
            1,
        )
        .map_err(|e| RealtimeError::AudioStream(format!("resampler init: {e}")))?;

        let output_buf = vec![vec![0f32; resampler.output_frames_max()]; 1];

        tracing::debug!(from_rate, to_rate, chunk_size, "resampler created");

        Ok(Self {
            resampler: Some(resampler),
            input_buf: Vec::new(),
            chunk_size,
            output_buf,
        })
    }

    /// Feed samples; returns whatever full blocks produced (may be empty).
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        let Some(ref mut resampler) = self.resampler else {
            return samples.to_vec();
        };

        self.input_buf.extend_from_slice(samples);

        let mut result = Vec::new();
        while self.input_buf.len() >= self.chunk_size {
            let block = &self.input_buf[..self.chunk_size];
            match resampler.process_into_buffer(&[block], &mut self.output_buf, None) {
                Ok((_consumed, produced)) => {
                    result.extend_from_slice(&self.output_buf[0][..produced]);
                }
                Err(e) => error!("resampler process error: {e}"),
            }
            self.input_buf.drain(..self.chunk_size);
        }
        result
    }

    /// Drop buffered partial input (e.g. after a playback flush).
    pub fn reset(&mut self) {
        self.input_buf.clear();
        if let Some(resampler) = self.resampler.as_mut() {
            resampler.reset();
        }
    }

    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_identity() {
        let mut rc = RateConverter::new(24_000, 24_000, 480).unwrap();
        assert!(rc.is_passthrough());
        let samples: Vec<f32> = (0..240).map(|i| i as f32 * 0.001).collect();
        assert_eq!(rc.process(&samples), samples);
    }

    #[test]
    fn downsample_48k_to_24k_halves_length() {
        let mut rc = RateConverter::new(48_000, 24_000, 960).unwrap();
        let out = rc.process(&vec![0.0f32; 960]);
        assert!(
            (out.len() as isize - 480).unsigned_abs() <= 10,
            "output len={}",
            out.len()
        );
    }

    #[test]
    fn partial_block_waits_for_more_input() {
        let mut rc = RateConverter::new(48_000, 16_000, 960).unwrap();
        assert!(rc.process(&vec![0.0f32; 500]).is_empty());
        assert!(!rc.process(&vec![0.0f32; 500]).is_empty());
    }

    #[test]
    fn reset_discards_partial_input() {
        let mut rc = RateConverter::new(48_000, 16_000, 960).unwrap();
        rc.process(&vec![0.0f32; 900]);
        rc.reset();
        assert!(rc.process(&vec![0.0f32; 100]).is_empty());
    }

    #[test]
    fn zero_rate_is_rejected() {
        assert!(RateConverter::new(0, 16_000, 960).is_err());
    }
}
