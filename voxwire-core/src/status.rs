//! Broadcast event types for session status and live microphone activity.
//!
//! | Event | Sender |
//! |-------|--------|
//! | `SessionStatusEvent` | `ServiceManager::subscribe_status` |
//! | `AudioActivityEvent` | `AudioCapture::subscribe_activity` |

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Audio activity events
// ---------------------------------------------------------------------------

/// Emitted for each processed capture chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioActivityEvent {
    /// Monotonically increasing per-capture sequence number.
    pub seq: u64,
    /// Root-mean-square level of the chunk in [0.0, 1.0].
    pub rms: f32,
    /// Debounced VAD state after this chunk.
    pub is_speech: bool,
}

// ---------------------------------------------------------------------------
// Session status events
// ---------------------------------------------------------------------------

/// Emitted when the connection to the realtime service changes state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusEvent {
    pub status: SessionStatus,
    /// Optional human-readable detail (e.g. error message, retry attempt).
    pub detail: Option<String>,
}

/// Lifecycle of the realtime session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Client built but `start()` not yet called.
    Idle,
    /// Opening the transport.
    Connecting,
    /// Transport open and session options applied.
    Connected,
    /// Transport lost or session expired; a reconnect is in progress.
    Reconnecting,
    /// Stopped by the caller; may be restarted.
    Stopped,
    /// Transport failed and will not be retried.
    Error,
}
