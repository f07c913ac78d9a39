//! Fixed-capacity pre-roll history for the capture path.

use ringbuf::{
    traits::{Consumer, Observer, RingBuffer},
    HeapRb,
};

/// Circular buffer holding the most recent `capacity` capture samples.
///
/// Allocated once; writes past capacity overwrite the oldest samples in place.
pub struct PrerollBuffer {
    ring: HeapRb<f32>,
}

impl PrerollBuffer {
    /// Buffer sized for `duration_secs` of audio at `sample_rate`.
    pub fn for_duration(duration_secs: f32, sample_rate: u32) -> Self {
        let capacity = (duration_secs.max(0.0) * sample_rate as f32).round() as usize;
        Self::with_capacity(capacity)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            ring: HeapRb::new(capacity.max(1)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity().get()
    }

    pub fn len(&self) -> usize {
        self.ring.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Append samples, wrapping around and discarding the oldest on overflow.
    pub fn write(&mut self, samples: &[f32]) {
        self.ring.push_slice_overwrite(samples);
    }

    /// Copy of the buffered history, oldest sample first.
    pub fn snapshot(&self) -> Vec<f32> {
        self.ring.iter().copied().collect()
    }

    pub fn clear(&mut self) {
        self.ring.clear();
    }
}
