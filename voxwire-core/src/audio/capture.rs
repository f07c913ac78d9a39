//! Microphone capture with VAD gating and pre-roll stitching.
//!
//! ## Per-chunk flow (capture thread)
//!
//! ```text
//! 1. Drain device ring → resample to the stream rate → fixed-size chunks
//! 2. RMS + VAD (when a detector is configured)
//! 3. No detector   : forward every chunk
//!    speech started: notify, then forward cross-faded pre-roll + chunk
//!    in speech     : forward the chunk
//!    speech ended  : notify, forward nothing until the next start
//! 4. Always write the chunk into the pre-roll ring
//! ```
//!
//! Forwarded audio reaches the [`CaptureSink`] as PCM16 LE bytes. The sink is
//! called on the capture thread and must hand work off without blocking.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::{
    pcm::{f32_to_pcm16, AudioStreamOptions},
    resample::RateConverter,
    InputStream,
};
use crate::{
    buffering::{
        chunk::{rms, AudioChunk},
        create_sample_ring,
        preroll::PrerollBuffer,
        Consumer, CAPTURE_RING_CAPACITY,
    },
    error::{RealtimeError, Result},
    status::AudioActivityEvent,
    vad::VoiceActivityDetector,
};

/// Samples drained from the device ring per iteration.
const DRAIN_CHUNK: usize = 960;
/// Sleep when the device ring is empty.
const EMPTY_SLEEP: Duration = Duration::from_millis(5);
/// Bounded wait for the capture thread to exit.
const JOIN_TIMEOUT: Duration = Duration::from_secs(2);
const ACTIVITY_CAP: usize = 256;

/// Receives capture output. Called from the capture thread.
pub trait CaptureSink: Send + Sync + 'static {
    /// PCM16 LE audio to forward to the session.
    fn on_audio(&self, pcm: Vec<u8>);
    /// Local VAD entered speech. Fired before the stitched audio is forwarded.
    fn on_speech_started(&self);
    /// Local VAD left speech (or capture stopped mid-utterance).
    fn on_speech_ended(&self);
}

/// Configuration for [`AudioCapture`].
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Chunk stride fed to the VAD (ms). Default: 20.
    pub chunk_duration_ms: u32,
    /// Pre-roll history kept for speech starts (s). Default: 0.5.
    pub preroll_duration_sec: f32,
    /// Cross-fade length between pre-roll tail and chunk head. Default: 240
    /// (10 ms at 24 kHz).
    pub cross_fade_samples: usize,
    /// Input device name; `None` selects the system default.
    pub preferred_device: Option<String>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            chunk_duration_ms: 20,
            preroll_duration_sec: 0.5,
            cross_fade_samples: 240,
            preferred_device: None,
        }
    }
}

/// Linear fade curves of length `n`: `fade_in[i] = i / n`, `fade_out = 1 - fade_in`.
pub fn cross_fade_curves(n: usize) -> (Vec<f32>, Vec<f32>) {
    let fade_in: Vec<f32> = (0..n).map(|i| i as f32 / n as f32).collect();
    let fade_out = fade_in.iter().map(|v| 1.0 - v).collect();
    (fade_out, fade_in)
}

/// Join a pre-roll snapshot and the chunk that triggered speech start,
/// cross-fading `min(cross_fade_samples, preroll.len(), chunk.len())` samples.
pub fn stitch_preroll(preroll: &[f32], chunk: &[f32], cross_fade_samples: usize) -> Vec<f32> {
    let n = cross_fade_samples.min(preroll.len()).min(chunk.len());
    let head = preroll.len() - n;
    let (fade_out, fade_in) = cross_fade_curves(n);

    let mut out = Vec::with_capacity(preroll.len() + chunk.len() - n);
    out.extend_from_slice(&preroll[..head]);
    out.extend(
        (0..n).map(|i| preroll[head + i] * fade_out[i] + chunk[i] * fade_in[i]),
    );
    out.extend_from_slice(&chunk[n..]);
    out
}

/// What one chunk produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkOutcome {
    pub forward: Option<Vec<f32>>,
    pub speech_started: bool,
    pub speech_ended: bool,
    pub rms: f32,
    pub is_speech: bool,
}

/// Device-independent capture state: VAD, gating and pre-roll.
pub struct CaptureProcessor {
    vad: Option<Box<dyn VoiceActivityDetector>>,
    preroll: PrerollBuffer,
    cross_fade_samples: usize,
    sample_rate: u32,
    in_speech: bool,
}

impl CaptureProcessor {
    /// `vad = None` disables gating: every chunk is forwarded.
    pub fn new(
        vad: Option<Box<dyn VoiceActivityDetector>>,
        sample_rate: u32,
        config: &CaptureConfig,
    ) -> Self {
        Self {
            vad,
            preroll: PrerollBuffer::for_duration(config.preroll_duration_sec, sample_rate),
            cross_fade_samples: config.cross_fade_samples,
            sample_rate,
            in_speech: false,
        }
    }

    pub fn in_speech(&self) -> bool {
        self.in_speech
    }

    pub fn process(&mut self, samples: &[f32]) -> ChunkOutcome {
        let level = rms(samples);
        let mut outcome = ChunkOutcome {
            rms: level,
            ..ChunkOutcome::default()
        };

        let Some(vad) = self.vad.as_mut() else {
            outcome.forward = Some(samples.to_vec());
            self.preroll.write(samples);
            return outcome;
        };

        let chunk = AudioChunk::new(samples.to_vec(), self.sample_rate);
        match vad.process_chunk(&chunk) {
            Ok(t) if t.speech_started() => {
                let snapshot = self.preroll.snapshot();
                outcome.forward = Some(stitch_preroll(&snapshot, samples, self.cross_fade_samples));
                outcome.speech_started = true;
                self.in_speech = true;
            }
            Ok(t) if t.speech_ended() => {
                outcome.speech_ended = true;
                self.in_speech = false;
            }
            Ok(_) => {
                if self.in_speech {
                    outcome.forward = Some(samples.to_vec());
                }
            }
            Err(e) => {
                // Treated as "not speech" for this chunk only.
                warn!(error = %e, "VAD failed on chunk");
            }
        }
        outcome.is_speech = self.in_speech;

        self.preroll.write(samples);
        outcome
    }

    /// Leave speech without a VAD transition (capture stopping).
    /// Returns whether speech was active.
    pub fn finish(&mut self) -> bool {
        let was = self.in_speech;
        self.in_speech = false;
        if let Some(vad) = self.vad.as_mut() {
            vad.reset();
        }
        self.preroll.clear();
        was
    }
}

/// Routes processor outcomes to the sink and the activity channel.
pub struct CaptureWorker {
    processor: CaptureProcessor,
    sink: Arc<dyn CaptureSink>,
    activity_tx: broadcast::Sender<AudioActivityEvent>,
    seq: u64,
}

impl CaptureWorker {
    pub fn new(
        processor: CaptureProcessor,
        sink: Arc<dyn CaptureSink>,
        activity_tx: broadcast::Sender<AudioActivityEvent>,
    ) -> Self {
        Self {
            processor,
            sink,
            activity_tx,
            seq: 0,
        }
    }

    pub fn handle_chunk(&mut self, samples: &[f32]) {
        let outcome = self.processor.process(samples);

        if outcome.speech_started {
            debug!(rms = outcome.rms, "speech started");
            self.sink.on_speech_started();
        }
        if let Some(forward) = outcome.forward {
            self.sink.on_audio(f32_to_pcm16(&forward));
        }
        if outcome.speech_ended {
            debug!("speech ended");
            self.sink.on_speech_ended();
        }

        let _ = self.activity_tx.send(AudioActivityEvent {
            seq: self.seq,
            rms: outcome.rms,
            is_speech: outcome.is_speech,
        });
        self.seq = self.seq.saturating_add(1);
    }

    /// Close an open utterance on stop.
    pub fn finish(&mut self) {
        if self.processor.finish() {
            info!("capture stopped mid-speech, firing speech end");
            self.sink.on_speech_ended();
        }
    }
}

struct CaptureThread {
    handle: JoinHandle<()>,
    done_rx: crossbeam_channel::Receiver<()>,
}

/// Handle to microphone capture. `start()` blocks until the device is open.
pub struct AudioCapture {
    options: AudioStreamOptions,
    config: CaptureConfig,
    worker: Arc<Mutex<CaptureWorker>>,
    running: Arc<AtomicBool>,
    terminated: AtomicBool,
    thread: Mutex<Option<CaptureThread>>,
    activity_tx: broadcast::Sender<AudioActivityEvent>,
}

impl AudioCapture {
    /// `vad = None` streams raw audio without gating.
    pub fn new(
        options: AudioStreamOptions,
        config: CaptureConfig,
        vad: Option<Box<dyn VoiceActivityDetector>>,
        sink: Arc<dyn CaptureSink>,
    ) -> Self {
        let (activity_tx, _) = broadcast::channel(ACTIVITY_CAP);
        let processor = CaptureProcessor::new(vad, options.sample_rate, &config);
        let worker = CaptureWorker::new(processor, sink, activity_tx.clone());
        Self {
            options,
            config,
            worker: Arc::new(Mutex::new(worker)),
            running: Arc::new(AtomicBool::new(false)),
            terminated: AtomicBool::new(false),
            thread: Mutex::new(None),
            activity_tx,
        }
    }

    pub fn subscribe_activity(&self) -> broadcast::Receiver<AudioActivityEvent> {
        self.activity_tx.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Open the input device and start the capture thread.
    ///
    /// No-op when already running.
    ///
    /// # Errors
    /// Device-open failures, or `State` after `stop(true)`.
    pub fn start(&self) -> Result<()> {
        if self.terminated.load(Ordering::SeqCst) {
            return Err(RealtimeError::State("capture was terminated".into()));
        }
        let mut slot = self.thread.lock();
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.running.store(true, Ordering::SeqCst);

        let running = Arc::clone(&self.running);
        let worker = Arc::clone(&self.worker);
        let preferred = self.config.preferred_device.clone();
        let stream_rate = self.options.sample_rate;
        let chunk_samples =
            ((stream_rate as u64 * self.config.chunk_duration_ms as u64) / 1000).max(1) as usize;

        let (open_tx, open_rx) = std::sync::mpsc::channel::<Result<u32>>();
        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(1);

        let spawned = std::thread::Builder::new()
            .name("voxwire-capture".into())
            .spawn(move || {
                let (producer, mut consumer) = create_sample_ring(CAPTURE_RING_CAPACITY);
                let input = match InputStream::open(producer, Arc::clone(&running), preferred.as_deref())
                {
                    Ok(input) => input,
                    Err(e) => {
                        let _ = open_tx.send(Err(e));
                        let _ = done_tx.send(());
                        return;
                    }
                };
                let mut resampler = match RateConverter::new(input.sample_rate, stream_rate, DRAIN_CHUNK) {
                    Ok(r) => r,
                    Err(e) => {
                        let _ = open_tx.send(Err(e));
                        let _ = done_tx.send(());
                        return;
                    }
                };
                let _ = open_tx.send(Ok(input.sample_rate));

                let mut raw = vec![0f32; DRAIN_CHUNK];
                let mut pending: Vec<f32> = Vec::with_capacity(chunk_samples * 2);
                while running.load(Ordering::Relaxed) {
                    let n = consumer.pop_slice(&mut raw);
                    if n == 0 {
                        std::thread::sleep(EMPTY_SLEEP);
                        continue;
                    }
                    pending.extend(resampler.process(&raw[..n]));
                    while pending.len() >= chunk_samples {
                        let chunk: Vec<f32> = pending.drain(..chunk_samples).collect();
                        worker.lock().handle_chunk(&chunk);
                    }
                }

                input.stop();
                drop(input);
                worker.lock().finish();
                let _ = done_tx.send(());
                info!("capture thread stopped");
            });
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(RealtimeError::Io(e));
            }
        };

        match open_rx.recv() {
            Ok(Ok(device_rate)) => {
                info!(device_rate, stream_rate, chunk_samples, "capture started");
                *slot = Some(CaptureThread { handle, done_rx });
                Ok(())
            }
            Ok(Err(e)) => {
                self.running.store(false, Ordering::SeqCst);
                let _ = handle.join();
                error!(error = %e, "failed to open input device");
                Err(e)
            }
            Err(_) => {
                self.running.store(false, Ordering::SeqCst);
                Err(RealtimeError::AudioStream(
                    "capture thread exited before opening the device".into(),
                ))
            }
        }
    }

    /// Stop the capture thread (bounded join). A final speech end fires if an
    /// utterance was open. `terminate = true` makes the capture non-restartable.
    pub fn stop(&self, terminate: bool) {
        if terminate {
            self.terminated.store(true, Ordering::SeqCst);
        }
        self.running.store(false, Ordering::SeqCst);
        let Some(thread) = self.thread.lock().take() else {
            return;
        };
        match thread.done_rx.recv_timeout(JOIN_TIMEOUT) {
            Ok(()) => {
                let _ = thread.handle.join();
            }
            Err(_) => warn!("capture thread did not stop within {JOIN_TIMEOUT:?}, detaching"),
        }
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.stop(true);
    }
}
