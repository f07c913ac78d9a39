use thiserror::Error;

/// All errors produced by voxwire-core.
#[derive(Debug, Error)]
pub enum RealtimeError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("not connected to the realtime service")]
    NotConnected,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("service error [{code}]: {message}")]
    Service { code: String, message: String },

    #[error("function execution failed: {0}")]
    FunctionExecution(String),

    #[error("invalid state: {0}")]
    State(String),

    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default input device found")]
    NoDefaultInputDevice,

    #[error("no default output device found")]
    NoDefaultOutputDevice,

    #[error("client is not running")]
    NotRunning,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("inference error: {0}")]
    Inference(String),

    #[error("model file not found: {path}")]
    ModelNotFound { path: std::path::PathBuf },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RealtimeError {
    /// Whether the failure came from the transport and may be retried by reconnecting.
    pub fn is_transport(&self) -> bool {
        matches!(self, RealtimeError::Transport(_) | RealtimeError::NotConnected)
    }
}

pub type Result<T> = std::result::Result<T, RealtimeError>;
