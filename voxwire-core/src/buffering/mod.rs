//! Sample buffers shared between real-time audio callbacks and worker threads.
//!
//! - [`create_sample_ring`]: lock-free SPSC ring (`ringbuf::HeapRb<f32>`) whose
//!   `push_slice`/`pop_slice` are wait-free, so the cpal callbacks can use it.
//! - [`preroll::PrerollBuffer`]: overwrite-in-place history of the most recent
//!   capture samples, stitched in front of an utterance on speech start.

pub mod chunk;
pub mod preroll;

use ringbuf::{traits::Split, HeapRb};

pub use ringbuf::traits::{Consumer, Observer, Producer};

/// Producer half, held by whichever side writes samples.
pub type SampleProducer = ringbuf::HeapProd<f32>;

/// Consumer half, held by whichever side reads samples.
pub type SampleConsumer = ringbuf::HeapCons<f32>;

/// Capture ring capacity: 2^18 = 262 144 f32 samples ≈ 5.4 s at 48 kHz.
pub const CAPTURE_RING_CAPACITY: usize = 1 << 18;

/// Playback ring capacity: 2^16 samples ≈ 1.4 s at 48 kHz. Kept short so a
/// barge-in flush discards little audio already handed to the device.
pub const PLAYBACK_RING_CAPACITY: usize = 1 << 16;

/// Create a matched producer/consumer pair backed by a heap-allocated ring.
pub fn create_sample_ring(capacity: usize) -> (SampleProducer, SampleConsumer) {
    HeapRb::<f32>::new(capacity.max(1)).split()
}
