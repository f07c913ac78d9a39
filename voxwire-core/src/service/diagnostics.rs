use std::sync::atomic::{AtomicUsize, Ordering};

/// Lock-free counters updated by the service manager and its event queue.
#[derive(Default)]
pub struct ServiceDiagnostics {
    pub frames_received: AtomicUsize,
    pub events_parsed: AtomicUsize,
    pub frames_dropped: AtomicUsize,
    pub events_sent: AtomicUsize,
    pub events_cleared: AtomicUsize,
    pub transport_errors: AtomicUsize,
    pub reconnects: AtomicUsize,
}

impl ServiceDiagnostics {
    pub fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        self.frames_received.store(0, Ordering::Relaxed);
        self.events_parsed.store(0, Ordering::Relaxed);
        self.frames_dropped.store(0, Ordering::Relaxed);
        self.events_sent.store(0, Ordering::Relaxed);
        self.events_cleared.store(0, Ordering::Relaxed);
        self.transport_errors.store(0, Ordering::Relaxed);
        self.reconnects.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            events_parsed: self.events_parsed.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            events_sent: self.events_sent.load(Ordering::Relaxed),
            events_cleared: self.events_cleared.load(Ordering::Relaxed),
            transport_errors: self.transport_errors.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiagnosticsSnapshot {
    pub frames_received: usize,
    pub events_parsed: usize,
    pub frames_dropped: usize,
    pub events_sent: usize,
    pub events_cleared: usize,
    pub transport_errors: usize,
    pub reconnects: usize,
}
