//! Buffered playback of synthesized audio.
//!
//! ```text
//! enqueue() ─► PlaybackQueue (crossbeam) ─► playback thread ─► OutputDevice::write
//! ```
//!
//! The playback thread waits for `min_buffer_fill` queued chunks before the
//! first write of every `start()`/`drain_and_restart()` cycle, then pops one
//! chunk at a time with a bounded wait. Underruns later in the cycle do not
//! re-arm the pre-fill.
//!
//! `drain_and_restart()` bumps a generation counter and empties the queue. The
//! playback thread notices the new generation, clears the device and pre-fills
//! again without closing the device.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::pcm::AudioStreamOptions;
use crate::error::{RealtimeError, Result};

/// Bounded wait for one queued chunk.
const POP_TIMEOUT: Duration = Duration::from_millis(100);
/// Poll interval while pre-filling.
const PREFILL_POLL: Duration = Duration::from_millis(5);
/// Bounded wait for the playback thread to exit.
const JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Sink for PCM16 LE stream audio. Owned by the playback thread.
pub trait OutputDevice {
    /// Render one chunk. May block the playback thread until the device has room.
    fn write(&mut self, pcm: &[u8]) -> Result<()>;
    /// Discard audio already handed to the device.
    fn clear(&mut self);
}

/// Opens the output device on the playback thread.
pub type OutputDeviceFactory = Arc<dyn Fn() -> Result<Box<dyn OutputDevice>> + Send + Sync>;

/// What the client and event handler need from playback.
pub trait AudioOutput: Send + Sync {
    /// Queue a decoded PCM16 chunk; dropped with a warning if the queue is full.
    fn enqueue(&self, chunk: Vec<u8>);
    /// Empty the queue and re-arm the pre-fill without stopping the device.
    fn drain_and_restart(&self);
    /// Queue non-empty, used as "assistant still speaking".
    fn is_audio_playing(&self) -> bool;
    /// Audio written to the device since the last start/drain.
    fn played_duration(&self) -> Duration;
}

#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    /// Queue capacity in chunks; 0 = unbounded. Default: 256.
    pub queue_capacity: usize,
    /// Chunks required before the first write of a cycle. Default: 3.
    pub min_buffer_fill: usize,
    /// Output device name; `None` selects the system default.
    pub preferred_device: Option<String>,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            min_buffer_fill: 3,
            preferred_device: None,
        }
    }
}

/// Chunks are tagged with the generation they were queued in.
type Tagged = (u64, Vec<u8>);

struct PlaybackShared {
    tx: Sender<Tagged>,
    rx: Receiver<Tagged>,
    /// Held while tagging and sending a chunk, and while bumping the
    /// generation and draining. After a drain the queue holds only chunks
    /// of the new generation, so the pre-fill count never includes stale ones.
    gate: Mutex<()>,
    running: AtomicBool,
    generation: AtomicU64,
    played_bytes: AtomicU64,
    dropped_chunks: AtomicU64,
}

struct PlaybackThread {
    handle: JoinHandle<()>,
    done_rx: Receiver<()>,
}

/// Playback queue plus the thread that drains it into an [`OutputDevice`].
pub struct AudioPlayback {
    options: AudioStreamOptions,
    min_buffer_fill: usize,
    factory: OutputDeviceFactory,
    shared: Arc<PlaybackShared>,
    thread: Mutex<Option<PlaybackThread>>,
}

impl AudioPlayback {
    pub fn new(options: AudioStreamOptions, config: &PlaybackConfig, factory: OutputDeviceFactory) -> Self {
        let (tx, rx) = if config.queue_capacity == 0 {
            crossbeam_channel::unbounded()
        } else {
            crossbeam_channel::bounded(config.queue_capacity)
        };
        Self {
            options,
            min_buffer_fill: config.min_buffer_fill,
            factory,
            shared: Arc::new(PlaybackShared {
                tx,
                rx,
                gate: Mutex::new(()),
                running: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                played_bytes: AtomicU64::new(0),
                dropped_chunks: AtomicU64::new(0),
            }),
            thread: Mutex::new(None),
        }
    }

    /// Playback through the system speaker (`audio-cpal`).
    pub fn with_default_device(options: AudioStreamOptions, config: &PlaybackConfig) -> Self {
        let preferred = config.preferred_device.clone();
        let factory: OutputDeviceFactory = Arc::new(move || {
            CpalOutput::open(options, preferred.as_deref())
                .map(|device| Box::new(device) as Box<dyn OutputDevice>)
        });
        Self::new(options, config, factory)
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Chunks discarded because the queue was full.
    pub fn dropped_chunks(&self) -> u64 {
        self.shared.dropped_chunks.load(Ordering::Relaxed)
    }

    pub fn queue_depth(&self) -> usize {
        self.shared.rx.len()
    }

    /// Open the device and launch the playback thread. No-op when running.
    ///
    /// # Errors
    /// Whatever the device factory returns.
    pub fn start(&self) -> Result<()> {
        let mut slot = self.thread.lock();
        if self.shared.running.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.shared.running.store(true, Ordering::SeqCst);
        self.shared.played_bytes.store(0, Ordering::SeqCst);

        let shared = Arc::clone(&self.shared);
        let factory = Arc::clone(&self.factory);
        let min_fill = self.min_buffer_fill;
        let (open_tx, open_rx) = std::sync::mpsc::channel::<Result<()>>();
        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(1);

        let spawned = std::thread::Builder::new()
            .name("voxwire-playback".into())
            .spawn(move || {
                match factory() {
                    Ok(mut device) => {
                        let _ = open_tx.send(Ok(()));
                        run_loop(&shared, device.as_mut(), min_fill);
                        device.clear();
                    }
                    Err(e) => {
                        let _ = open_tx.send(Err(e));
                    }
                }
                let _ = done_tx.send(());
            });
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                self.shared.running.store(false, Ordering::SeqCst);
                return Err(RealtimeError::Io(e));
            }
        };

        match open_rx.recv() {
            Ok(Ok(())) => {
                info!(min_fill, "playback started");
                *slot = Some(PlaybackThread { handle, done_rx });
                Ok(())
            }
            Ok(Err(e)) => {
                self.shared.running.store(false, Ordering::SeqCst);
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                self.shared.running.store(false, Ordering::SeqCst);
                Err(RealtimeError::AudioStream(
                    "playback thread exited before opening the device".into(),
                ))
            }
        }
    }

    /// Signal the loop, join it (bounded) and release the device.
    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        let Some(thread) = self.thread.lock().take() else {
            return;
        };
        match thread.done_rx.recv_timeout(JOIN_TIMEOUT) {
            Ok(()) => {
                let _ = thread.handle.join();
            }
            Err(_) => warn!("playback thread did not stop within {JOIN_TIMEOUT:?}, detaching"),
        }
        while self.shared.rx.try_recv().is_ok() {}
        info!("playback stopped");
    }
}

impl AudioOutput for AudioPlayback {
    fn enqueue(&self, chunk: Vec<u8>) {
        let sent = {
            let _gate = self.shared.gate.lock();
            let tag = self.shared.generation.load(Ordering::SeqCst);
            self.shared.tx.try_send((tag, chunk))
        };
        match sent {
            Ok(()) => {}
            Err(TrySendError::Full((_, chunk))) => {
                self.shared.dropped_chunks.fetch_add(1, Ordering::Relaxed);
                warn!(bytes = chunk.len(), "playback queue full, dropping chunk");
            }
            Err(TrySendError::Disconnected(_)) => warn!("playback queue closed"),
        }
    }

    fn drain_and_restart(&self) {
        let mut drained = 0usize;
        {
            let _gate = self.shared.gate.lock();
            self.shared.generation.fetch_add(1, Ordering::SeqCst);
            while self.shared.rx.try_recv().is_ok() {
                drained += 1;
            }
        }
        self.shared.played_bytes.store(0, Ordering::SeqCst);
        debug!(drained, "playback drained");
    }

    fn is_audio_playing(&self) -> bool {
        !self.shared.rx.is_empty()
    }

    fn played_duration(&self) -> Duration {
        self.options
            .duration_of(self.shared.played_bytes.load(Ordering::SeqCst) as usize)
    }
}

impl Drop for AudioPlayback {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_loop(shared: &PlaybackShared, device: &mut dyn OutputDevice, min_fill: usize) {
    let mut generation = shared.generation.load(Ordering::SeqCst);
    // A chunk popped while waiting that belongs to the next cycle.
    let mut held: Option<Tagged> = None;

    'cycle: while shared.running.load(Ordering::SeqCst) {
        // Initial buffer fill for this cycle.
        loop {
            if !shared.running.load(Ordering::SeqCst) {
                break 'cycle;
            }
            let current = shared.generation.load(Ordering::SeqCst);
            if current != generation {
                generation = current;
                if held.as_ref().is_some_and(|(tag, _)| *tag < current) {
                    held = None;
                }
                device.clear();
            }
            let depth = shared.rx.len() + usize::from(held.is_some());
            if depth >= min_fill.max(1) {
                break;
            }
            std::thread::sleep(PREFILL_POLL);
        }
        debug!(depth = shared.rx.len(), "pre-fill reached");

        while shared.running.load(Ordering::SeqCst) {
            if shared.generation.load(Ordering::SeqCst) != generation {
                continue 'cycle;
            }
            let (tag, chunk) = match held.take() {
                Some(tagged) => tagged,
                None => match shared.rx.recv_timeout(POP_TIMEOUT) {
                    Ok(tagged) => tagged,
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break 'cycle,
                },
            };
            if tag < generation {
                continue;
            }
            if tag > generation {
                held = Some((tag, chunk));
                continue 'cycle;
            }
            match device.write(&chunk) {
                Ok(()) => {
                    shared
                        .played_bytes
                        .fetch_add(chunk.len() as u64, Ordering::SeqCst);
                }
                Err(e) => warn!(error = %e, "output device write failed"),
            }
        }
    }
}

/// Speaker output: PCM16 stream audio resampled to the device rate and fed
/// to the cpal callback through a ring.
pub struct CpalOutput {
    _stream: super::OutputStream,
    producer: crate::buffering::SampleProducer,
    flush: Arc<AtomicBool>,
    resampler: super::resample::RateConverter,
    /// Ring occupancy above which `write` waits (≈ 250 ms at the device rate).
    high_water: usize,
}

/// Max time `write` waits for the device to make room.
const WRITE_STALL: Duration = Duration::from_secs(2);
const FLUSH_ACK_WAIT: Duration = Duration::from_millis(100);

impl CpalOutput {
    pub fn open(options: AudioStreamOptions, preferred_device: Option<&str>) -> Result<Self> {
        use crate::buffering::{create_sample_ring, PLAYBACK_RING_CAPACITY};

        let (producer, consumer) = create_sample_ring(PLAYBACK_RING_CAPACITY);
        let flush = Arc::new(AtomicBool::new(false));
        let stream = super::OutputStream::open(consumer, Arc::clone(&flush), preferred_device)?;
        let resampler =
            super::resample::RateConverter::new(options.sample_rate, stream.sample_rate, 480)?;
        let high_water = (stream.sample_rate as usize / 4).clamp(1, PLAYBACK_RING_CAPACITY);
        Ok(Self {
            _stream: stream,
            producer,
            flush,
            resampler,
            high_water,
        })
    }
}

impl OutputDevice for CpalOutput {
    fn write(&mut self, pcm: &[u8]) -> Result<()> {
        use crate::buffering::{Observer, Producer};

        let samples = self.resampler.process(&super::pcm::pcm16_to_f32(pcm));
        let started = std::time::Instant::now();
        let mut offset = 0;
        while offset < samples.len() {
            let room = self.high_water.saturating_sub(self.producer.occupied_len());
            if room > 0 {
                let end = (offset + room).min(samples.len());
                offset += self.producer.push_slice(&samples[offset..end]);
                continue;
            }
            if started.elapsed() >= WRITE_STALL {
                return Err(RealtimeError::AudioStream("output device stalled".into()));
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        Ok(())
    }

    fn clear(&mut self) {
        self.resampler.reset();
        self.flush.store(true, Ordering::Release);
        let started = std::time::Instant::now();
        while self.flush.load(Ordering::Acquire) && started.elapsed() < FLUSH_ACK_WAIT {
            std::thread::sleep(Duration::from_millis(1));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[derive(Default)]
    struct DeviceLog {
        writes: Mutex<Vec<Vec<u8>>>,
        clears: AtomicU64,
    }

    struct FakeDevice(Arc<DeviceLog>);

    impl OutputDevice for FakeDevice {
        fn write(&mut self, pcm: &[u8]) -> Result<()> {
            self.0.writes.lock().push(pcm.to_vec());
            Ok(())
        }
        fn clear(&mut self) {
            self.0.clears.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn playback(capacity: usize, min_fill: usize) -> (AudioPlayback, Arc<DeviceLog>) {
        let log = Arc::new(DeviceLog::default());
        let device_log = Arc::clone(&log);
        let factory: OutputDeviceFactory =
            Arc::new(move || Ok(Box::new(FakeDevice(Arc::clone(&device_log))) as Box<dyn OutputDevice>));
        let config = PlaybackConfig {
            queue_capacity: capacity,
            min_buffer_fill: min_fill,
            preferred_device: None,
        };
        (AudioPlayback::new(AudioStreamOptions::default(), &config, factory), log)
    }

    fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn no_write_before_prefill_threshold() {
        let (pb, log) = playback(16, 3);
        pb.start().unwrap();

        pb.enqueue(vec![1, 0]);
        pb.enqueue(vec![2, 0]);
        std::thread::sleep(Duration::from_millis(150));
        assert!(log.writes.lock().is_empty());

        pb.enqueue(vec![3, 0]);
        assert!(wait_for(|| log.writes.lock().len() == 3));
        assert_eq!(*log.writes.lock(), vec![vec![1, 0], vec![2, 0], vec![3, 0]]);
        pb.stop();
    }

    #[test]
    fn underrun_does_not_rearm_prefill() {
        let (pb, log) = playback(16, 2);
        pb.start().unwrap();
        pb.enqueue(vec![1, 0]);
        pb.enqueue(vec![2, 0]);
        assert!(wait_for(|| log.writes.lock().len() == 2));

        pb.enqueue(vec![3, 0]);
        assert!(wait_for(|| log.writes.lock().len() == 3));
        pb.stop();
    }

    #[test]
    fn drain_clears_queue_and_rearms_prefill() {
        let (pb, log) = playback(16, 2);
        pb.start().unwrap();
        pb.enqueue(vec![1, 0]);
        pb.enqueue(vec![2, 0]);
        assert!(wait_for(|| log.writes.lock().len() == 2));
        let expected = AudioStreamOptions::default().duration_of(4);
        assert!(wait_for(|| pb.played_duration() == expected));

        pb.drain_and_restart();
        assert!(!pb.is_audio_playing());
        assert_eq!(pb.played_duration(), Duration::ZERO);
        assert!(wait_for(|| log.clears.load(Ordering::SeqCst) >= 1));

        pb.enqueue(vec![4, 0]);
        std::thread::sleep(Duration::from_millis(150));
        assert_eq!(log.writes.lock().len(), 2);

        pb.enqueue(vec![5, 0]);
        assert!(wait_for(|| log.writes.lock().len() == 4));
        assert_eq!(log.writes.lock()[2], vec![4, 0]);
        pb.stop();
    }

    #[test]
    fn drain_never_leaves_stale_chunks_behind() {
        let (pb, _log) = playback(0, 1);
        let pb = Arc::new(pb);
        let stop = Arc::new(AtomicBool::new(false));
        let feeder = {
            let pb = Arc::clone(&pb);
            let stop = Arc::clone(&stop);
            std::thread::spawn(move || {
                while !stop.load(Ordering::SeqCst) {
                    pb.enqueue(vec![0, 0]);
                }
            })
        };

        for _ in 0..500 {
            pb.drain_and_restart();
            let current = pb.shared.generation.load(Ordering::SeqCst);
            for (tag, _) in pb.shared.rx.try_iter().take(64) {
                assert_eq!(tag, current, "chunk from a drained cycle still queued");
            }
        }
        stop.store(true, Ordering::SeqCst);
        feeder.join().unwrap();
    }

    #[test]
    fn full_queue_drops_with_count() {
        let (pb, _log) = playback(2, 1);
        pb.enqueue(vec![1]);
        pb.enqueue(vec![2]);
        pb.enqueue(vec![3]);
        assert_eq!(pb.dropped_chunks(), 1);
        assert_eq!(pb.queue_depth(), 2);
        assert!(pb.is_audio_playing());
    }

    #[test]
    fn zero_capacity_means_unbounded() {
        let (pb, _log) = playback(0, 1);
        for i in 0..1_000u32 {
            pb.enqueue(i.to_le_bytes().to_vec());
        }
        assert_eq!(pb.dropped_chunks(), 0);
        assert_eq!(pb.queue_depth(), 1_000);
    }

    #[test]
    fn factory_error_propagates_from_start() {
        let factory: OutputDeviceFactory =
            Arc::new(|| Err(RealtimeError::NoDefaultOutputDevice));
        let pb = AudioPlayback::new(AudioStreamOptions::default(), &PlaybackConfig::default(), factory);
        assert!(matches!(pb.start(), Err(RealtimeError::NoDefaultOutputDevice)));
        assert!(!pb.is_running());
    }

    #[test]
    fn stop_is_bounded_and_restartable() {
        let (pb, log) = playback(16, 1);
        pb.start().unwrap();
        pb.stop();
        pb.stop();
        pb.start().unwrap();
        pb.enqueue(vec![7, 0]);
        assert!(wait_for(|| log.writes.lock().len() == 1));
        pb.stop();
    }
}
