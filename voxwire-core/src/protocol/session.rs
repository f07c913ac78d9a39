//! Session options and the `session.update` payload.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Default direct endpoint.
pub const DEFAULT_REALTIME_URL: &str = "wss://api.openai.com/v1/realtime";
/// Default model for direct connections.
pub const DEFAULT_MODEL: &str = "gpt-4o-realtime-preview";
/// Default gateway API version.
pub const DEFAULT_GATEWAY_API_VERSION: &str = "2024-10-01-preview";

/// Where and how to authenticate the WebSocket.
#[derive(Clone, PartialEq)]
pub enum ConnectionTarget {
    /// Bearer auth; the model goes in the query string.
    Direct { url: String, api_key: String },
    /// Managed gateway: `api-key` header and a fresh request id per connect.
    Gateway {
        endpoint: String,
        api_key: String,
        deployment: String,
        api_version: String,
    },
}

impl std::fmt::Debug for ConnectionTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionTarget::Direct { url, .. } => f
                .debug_struct("Direct")
                .field("url", url)
                .field("api_key", &"<redacted>")
                .finish(),
            ConnectionTarget::Gateway {
                endpoint,
                deployment,
                api_version,
                ..
            } => f
                .debug_struct("Gateway")
                .field("endpoint", endpoint)
                .field("deployment", deployment)
                .field("api_version", api_version)
                .field("api_key", &"<redacted>")
                .finish(),
        }
    }
}

impl ConnectionTarget {
    pub fn direct(api_key: impl Into<String>) -> Self {
        ConnectionTarget::Direct {
            url: DEFAULT_REALTIME_URL.to_string(),
            api_key: api_key.into(),
        }
    }

    /// WebSocket URL for `model`.
    pub fn request_url(&self, model: &str) -> String {
        match self {
            ConnectionTarget::Direct { url, .. } => {
                let sep = if url.contains('?') { '&' } else { '?' };
                format!("{url}{sep}model={model}")
            }
            ConnectionTarget::Gateway {
                endpoint,
                deployment,
                api_version,
                ..
            } => {
                let base = endpoint.trim_end_matches('/');
                let base = if let Some(rest) = base.strip_prefix("https://") {
                    format!("wss://{rest}")
                } else if let Some(rest) = base.strip_prefix("http://") {
                    format!("ws://{rest}")
                } else {
                    base.to_string()
                };
                format!("{base}/openai/realtime?api-version={api_version}&deployment={deployment}")
            }
        }
    }

    /// Handshake headers. Gateway targets get a new request id on every call.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        match self {
            ConnectionTarget::Direct { api_key, .. } => vec![
                ("Authorization", format!("Bearer {api_key}")),
                ("OpenAI-Beta", "realtime=v1".to_string()),
            ],
            ConnectionTarget::Gateway { api_key, .. } => vec![
                ("api-key", api_key.clone()),
                ("x-ms-client-request-id", uuid::Uuid::new_v4().to_string()),
            ],
        }
    }

    pub fn api_key(&self) -> &str {
        match self {
            ConnectionTarget::Direct { api_key, .. } | ConnectionTarget::Gateway { api_key, .. } => {
                api_key
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Text,
    Audio,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioFormat {
    Pcm16,
    G711Ulaw,
    G711Alaw,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputTranscription {
    pub model: String,
}

/// Server-side turn detection. `None` in [`SessionOptions`] means the client
/// runs its own VAD and commits turns itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnDetection {
    ServerVad {
        threshold: f32,
        prefix_padding_ms: u32,
        silence_duration_ms: u32,
    },
}

impl Default for TurnDetection {
    fn default() -> Self {
        TurnDetection::ServerVad {
            threshold: 0.5,
            prefix_padding_ms: 300,
            silence_duration_ms: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object.
    pub parameters: serde_json::Value,
}

impl ToolDefinition {
    pub fn function(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            kind: "function".to_string(),
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// Response token cap, `n` or `"inf"` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MaxOutputTokens {
    Limited(u32),
    #[default]
    Infinite,
}

impl Serialize for MaxOutputTokens {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            MaxOutputTokens::Limited(n) => serializer.serialize_u32(*n),
            MaxOutputTokens::Infinite => serializer.serialize_str("inf"),
        }
    }
}

impl<'de> Deserialize<'de> for MaxOutputTokens {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u32),
            Text(String),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Ok(MaxOutputTokens::Limited(n)),
            Raw::Text(s) if s == "inf" => Ok(MaxOutputTokens::Infinite),
            Raw::Text(s) => Err(serde::de::Error::custom(format!(
                "expected a token count or \"inf\", got {s:?}"
            ))),
        }
    }
}

/// Everything needed to open and configure a session. Replaced wholesale by
/// `update_session`.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOptions {
    pub connection: ConnectionTarget,
    pub model: String,
    pub modalities: Vec<Modality>,
    pub instructions: String,
    pub voice: String,
    pub input_audio_format: AudioFormat,
    pub output_audio_format: AudioFormat,
    pub input_audio_transcription: Option<InputTranscription>,
    pub turn_detection: Option<TurnDetection>,
    pub tools: Vec<ToolDefinition>,
    /// `auto`, `none`, `required`, or a function name.
    pub tool_choice: String,
    pub temperature: f32,
    pub max_output_tokens: MaxOutputTokens,
    pub enable_auto_reconnect: bool,
}

impl SessionOptions {
    pub fn new(connection: ConnectionTarget) -> Self {
        Self {
            connection,
            model: DEFAULT_MODEL.to_string(),
            modalities: vec![Modality::Text, Modality::Audio],
            instructions: String::new(),
            voice: "alloy".to_string(),
            input_audio_format: AudioFormat::Pcm16,
            output_audio_format: AudioFormat::Pcm16,
            input_audio_transcription: None,
            turn_detection: Some(TurnDetection::default()),
            tools: Vec::new(),
            tool_choice: "auto".to_string(),
            temperature: 0.8,
            max_output_tokens: MaxOutputTokens::Infinite,
            enable_auto_reconnect: true,
        }
    }

    /// `true` when turns are detected locally (no server VAD).
    pub fn is_client_turn_detection(&self) -> bool {
        self.turn_detection.is_none()
    }

    /// Full `session.update` payload. Every field is present so the service
    /// replaces the whole configuration.
    pub fn to_session_config(&self) -> SessionConfig {
        SessionConfig {
            modalities: self.modalities.clone(),
            instructions: self.instructions.clone(),
            voice: self.voice.clone(),
            input_audio_format: self.input_audio_format,
            output_audio_format: self.output_audio_format,
            input_audio_transcription: self.input_audio_transcription.clone(),
            turn_detection: self.turn_detection.clone(),
            tools: self.tools.clone(),
            tool_choice: self.tool_choice.clone(),
            temperature: self.temperature,
            max_response_output_tokens: self.max_output_tokens,
        }
    }
}

/// Wire form of the session configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub modalities: Vec<Modality>,
    pub instructions: String,
    pub voice: String,
    pub input_audio_format: AudioFormat,
    pub output_audio_format: AudioFormat,
    pub input_audio_transcription: Option<InputTranscription>,
    pub turn_detection: Option<TurnDetection>,
    pub tools: Vec<ToolDefinition>,
    pub tool_choice: String,
    pub temperature: f32,
    pub max_response_output_tokens: MaxOutputTokens,
}
