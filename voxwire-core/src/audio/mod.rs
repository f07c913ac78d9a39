//! Audio I/O via the cpal backend.
//!
//! # Design constraints
//!
//! cpal callbacks run on OS audio threads at elevated priority. They **must not**
//! block on a mutex, perform I/O, or wait on the async runtime. Both directions
//! therefore exchange samples with worker threads through SPSC ring buffers
//! whose `push_slice`/`pop_slice` are lock-free:
//!
//! ```text
//! mic callback ─► ring ─► capture thread (resample, VAD, pre-roll) ─► CaptureSink
//! AudioPlayback thread (queue, pre-fill) ─► CpalOutput ─► ring ─► speaker callback
//! ```
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio on
//! macOS). [`InputStream`] and [`OutputStream`] are created and dropped on the
//! worker thread that owns them.

pub mod capture;
pub mod device;
pub mod pcm;
pub mod playback;
pub mod resample;

pub use capture::{AudioCapture, CaptureConfig, CaptureSink};
pub use pcm::AudioStreamOptions;
pub use playback::{AudioOutput, AudioPlayback, OutputDevice, PlaybackConfig};

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

#[cfg(feature = "audio-cpal")]
use cpal::{
    traits::{DeviceTrait, StreamTrait},
    FromSample, Sample, SampleFormat, SampleRate, SizedSample, Stream, StreamConfig,
};
#[cfg(feature = "audio-cpal")]
use tracing::{error, info, warn};

#[cfg(feature = "audio-cpal")]
use crate::buffering::{Consumer, Producer};
use crate::{
    buffering::{SampleConsumer, SampleProducer},
    error::{RealtimeError, Result},
};

/// Live microphone stream pushing mono f32 samples into a ring producer.
///
/// **Not `Send`**: create and drop it on the same OS thread.
pub struct InputStream {
    #[cfg(feature = "audio-cpal")]
    _stream: Stream,
    /// Set to `false` to make the callback no-op.
    running: Arc<AtomicBool>,
    /// Native device sample rate (Hz).
    pub sample_rate: u32,
}

impl InputStream {
    /// Open an input device (preferred by name, else default) and start
    /// pushing downmixed samples into `producer`.
    ///
    /// # Errors
    /// `NoDefaultInputDevice` when no microphone is available, or
    /// `AudioStream` if cpal fails to build the stream.
    #[cfg(feature = "audio-cpal")]
    pub fn open(
        producer: SampleProducer,
        running: Arc<AtomicBool>,
        preferred_device: Option<&str>,
    ) -> Result<Self> {
        let host = cpal::default_host();
        let device = device::select_device(&host, device::DeviceDirection::Input, preferred_device)?;

        let supported = device
            .default_input_config()
            .map_err(|e| RealtimeError::AudioDevice(e.to_string()))?;
        let sample_rate = supported.sample_rate().0;
        let config = StreamConfig {
            channels: supported.channels(),
            sample_rate: SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        info!(
            device = device.name().unwrap_or_default().as_str(),
            sample_rate,
            channels = config.channels,
            "opening input device"
        );

        let flag = Arc::clone(&running);
        let stream = match supported.sample_format() {
            SampleFormat::F32 => build_input::<f32>(&device, &config, producer, flag),
            SampleFormat::I16 => build_input::<i16>(&device, &config, producer, flag),
            SampleFormat::U16 => build_input::<u16>(&device, &config, producer, flag),
            SampleFormat::U8 => build_input::<u8>(&device, &config, producer, flag),
            fmt => {
                return Err(RealtimeError::AudioStream(format!(
                    "unsupported sample format: {fmt:?}"
                )))
            }
        }?;

        stream
            .play()
            .map_err(|e| RealtimeError::AudioStream(e.to_string()))?;

        Ok(Self {
            _stream: stream,
            running,
            sample_rate,
        })
    }

    #[cfg(not(feature = "audio-cpal"))]
    pub fn open(
        _producer: SampleProducer,
        _running: Arc<AtomicBool>,
        _preferred_device: Option<&str>,
    ) -> Result<Self> {
        Err(RealtimeError::AudioStream(
            "compiled without audio-cpal feature".into(),
        ))
    }

    /// Signal the callback to no-op on its next invocation.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}

#[cfg(feature = "audio-cpal")]
fn build_input<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut producer: SampleProducer,
    running: Arc<AtomicBool>,
) -> Result<Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let channels = config.channels.max(1) as usize;
    // Grows to the largest callback size once, then reused.
    let mut mono: Vec<f32> = Vec::new();
    device
        .build_input_stream(
            config,
            move |data: &[T], _info: &cpal::InputCallbackInfo| {
                if !running.load(Ordering::Relaxed) {
                    return;
                }
                mono.resize(data.len() / channels, 0.0);
                for (frame, out) in data.chunks_exact(channels).zip(mono.iter_mut()) {
                    let sum: f32 = frame.iter().map(|s| s.to_sample::<f32>()).sum();
                    *out = sum / channels as f32;
                }
                let written = producer.push_slice(&mono);
                if written < mono.len() {
                    warn!(dropped = mono.len() - written, "capture ring full");
                }
            },
            |err| error!("input stream error: {err}"),
            None,
        )
        .map_err(|e| RealtimeError::AudioStream(e.to_string()))
}

/// Live speaker stream rendering mono f32 samples from a ring consumer.
///
/// Missing samples are rendered as silence. Setting the flush flag makes the
/// callback discard everything queued in the ring and clear the flag.
///
/// **Not `Send`**: create and drop it on the same OS thread.
pub struct OutputStream {
    #[cfg(feature = "audio-cpal")]
    _stream: Stream,
    /// Native device sample rate (Hz).
    pub sample_rate: u32,
}

impl OutputStream {
    #[cfg(feature = "audio-cpal")]
    pub fn open(
        consumer: SampleConsumer,
        flush: Arc<AtomicBool>,
        preferred_device: Option<&str>,
    ) -> Result<Self> {
        let host = cpal::default_host();
        let device =
            device::select_device(&host, device::DeviceDirection::Output, preferred_device)?;

        let supported = device
            .default_output_config()
            .map_err(|e| RealtimeError::AudioDevice(e.to_string()))?;
        let sample_rate = supported.sample_rate().0;
        let config = StreamConfig {
            channels: supported.channels(),
            sample_rate: SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        info!(
            device = device.name().unwrap_or_default().as_str(),
            sample_rate,
            channels = config.channels,
            "opening output device"
        );

        let stream = match supported.sample_format() {
            SampleFormat::F32 => build_output::<f32>(&device, &config, consumer, flush),
            SampleFormat::I16 => build_output::<i16>(&device, &config, consumer, flush),
            SampleFormat::U16 => build_output::<u16>(&device, &config, consumer, flush),
            SampleFormat::U8 => build_output::<u8>(&device, &config, consumer, flush),
            fmt => {
                return Err(RealtimeError::AudioStream(format!(
                    "unsupported sample format: {fmt:?}"
                )))
            }
        }?;

        stream
            .play()
            .map_err(|e| RealtimeError::AudioStream(e.to_string()))?;

        Ok(Self {
            _stream: stream,
            sample_rate,
        })
    }

    #[cfg(not(feature = "audio-cpal"))]
    pub fn open(
        _consumer: SampleConsumer,
        _flush: Arc<AtomicBool>,
        _preferred_device: Option<&str>,
    ) -> Result<Self> {
        Err(RealtimeError::AudioStream(
            "compiled without audio-cpal feature".into(),
        ))
    }
}

#[cfg(feature = "audio-cpal")]
fn build_output<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut consumer: SampleConsumer,
    flush: Arc<AtomicBool>,
) -> Result<Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels.max(1) as usize;
    let mut mono: Vec<f32> = Vec::new();
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _info: &cpal::OutputCallbackInfo| {
                if flush.load(Ordering::Acquire) {
                    consumer.clear();
                    flush.store(false, Ordering::Release);
                }
                mono.resize(data.len() / channels, 0.0);
                let n = consumer.pop_slice(&mut mono);
                mono[n..].fill(0.0);
                for (frame, sample) in data.chunks_exact_mut(channels).zip(mono.iter()) {
                    frame.fill(T::from_sample(*sample));
                }
            },
            |err| error!("output stream error: {err}"),
            None,
        )
        .map_err(|e| RealtimeError::AudioStream(e.to_string()))
}
