//! File + environment configuration.
//!
//! `ClientConfig` is read from a camelCase JSON file where every field is
//! optional. `OPENAI_API_KEY` and `VOXWIRE_ENDPOINT` override the file, then
//! `normalize()` clamps numeric fields into usable ranges. The typed configs
//! for the session, capture, playback and reconnect logic are derived from it.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::audio::{AudioStreamOptions, CaptureConfig, PlaybackConfig};
use crate::error::{RealtimeError, Result};
use crate::protocol::session::{
    AudioFormat, ConnectionTarget, InputTranscription, MaxOutputTokens, Modality, SessionOptions,
    ToolDefinition, TurnDetection, DEFAULT_GATEWAY_API_VERSION, DEFAULT_MODEL, DEFAULT_REALTIME_URL,
};
use crate::service::ReconnectPolicy;
use crate::vad::energy::EnergyVadConfig;

pub const API_KEY_ENV: &str = "OPENAI_API_KEY";
pub const ENDPOINT_ENV: &str = "VOXWIRE_ENDPOINT";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnDetectionMode {
    /// The service runs VAD and commits turns.
    Server,
    /// Local VAD drives commits and barge-in.
    Client,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VadKind {
    Energy,
    /// Requires the `onnx` feature.
    Neural,
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientConfig {
    pub api_key: String,
    /// Direct WebSocket URL. Ignored when `endpoint` is set.
    pub url: String,
    /// Managed gateway endpoint; empty means a direct connection.
    pub endpoint: String,
    pub deployment: String,
    pub api_version: String,
    pub model: String,
    pub instructions: String,
    pub voice: String,
    pub modalities: Vec<Modality>,
    pub input_audio_format: AudioFormat,
    pub output_audio_format: AudioFormat,
    /// Input transcription model, e.g. `whisper-1`.
    pub transcription_model: Option<String>,
    pub turn_detection: TurnDetectionMode,
    pub vad_threshold: f32,
    pub prefix_padding_ms: u32,
    pub silence_duration_ms: u32,
    pub tools: Vec<ToolDefinition>,
    pub tool_choice: String,
    pub temperature: f32,
    pub max_output_tokens: MaxOutputTokens,
    pub enable_auto_reconnect: bool,
    pub reconnect: ReconnectConfig,
    pub audio: AudioConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconnectConfig {
    /// 0 = unlimited.
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            multiplier: 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub chunk_duration_ms: u32,
    pub preroll_duration_sec: f32,
    pub cross_fade_samples: usize,
    pub queue_capacity: usize,
    pub min_buffer_fill: usize,
    pub vad: VadKind,
    pub silence_ratio: f32,
    pub min_speech_frames: u32,
    pub min_silence_frames: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        let capture = CaptureConfig::default();
        let playback = PlaybackConfig::default();
        let vad = EnergyVadConfig::default();
        Self {
            sample_rate: AudioStreamOptions::default().sample_rate,
            input_device: None,
            output_device: None,
            chunk_duration_ms: capture.chunk_duration_ms,
            preroll_duration_sec: capture.preroll_duration_sec,
            cross_fade_samples: capture.cross_fade_samples,
            queue_capacity: playback.queue_capacity,
            min_buffer_fill: playback.min_buffer_fill,
            vad: VadKind::Energy,
            silence_ratio: vad.silence_ratio,
            min_speech_frames: vad.min_speech_frames,
            min_silence_frames: vad.min_silence_frames,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            url: DEFAULT_REALTIME_URL.to_string(),
            endpoint: String::new(),
            deployment: String::new(),
            api_version: DEFAULT_GATEWAY_API_VERSION.to_string(),
            model: DEFAULT_MODEL.to_string(),
            instructions: String::new(),
            voice: "alloy".to_string(),
            modalities: vec![Modality::Text, Modality::Audio],
            input_audio_format: AudioFormat::Pcm16,
            output_audio_format: AudioFormat::Pcm16,
            transcription_model: None,
            turn_detection: TurnDetectionMode::Server,
            vad_threshold: 0.5,
            prefix_padding_ms: 300,
            silence_duration_ms: 500,
            tools: Vec::new(),
            tool_choice: "auto".to_string(),
            temperature: 0.8,
            max_output_tokens: MaxOutputTokens::Infinite,
            enable_auto_reconnect: true,
            reconnect: ReconnectConfig::default(),
            audio: AudioConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Read `path`, apply environment overrides and normalize.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let mut config = Self::from_json(&raw)?;
        config.apply_env();
        config.normalize();
        debug!(path = %path.display(), "config loaded");
        Ok(config)
    }

    /// Defaults plus environment overrides, for running without a file.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config.normalize();
        config
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| RealtimeError::Config(format!("invalid config: {e}")))
    }

    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from `lookup`; blank values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        if let Some(key) = get(API_KEY_ENV) {
            self.api_key = key;
        }
        if let Some(endpoint) = get(ENDPOINT_ENV) {
            self.endpoint = endpoint;
        }
    }

    pub fn normalize(&mut self) {
        if self.model.trim().is_empty() {
            self.model = DEFAULT_MODEL.to_string();
        }
        if self.voice.trim().is_empty() {
            self.voice = "alloy".to_string();
        }
        if self.modalities.is_empty() {
            self.modalities = vec![Modality::Text, Modality::Audio];
        }
        self.modalities.dedup();
        if self.tool_choice.trim().is_empty() {
            self.tool_choice = "auto".to_string();
        }
        if self.api_version.trim().is_empty() {
            self.api_version = DEFAULT_GATEWAY_API_VERSION.to_string();
        }
        self.temperature = self.temperature.clamp(0.6, 1.2);
        self.vad_threshold = self.vad_threshold.clamp(0.0, 1.0);
        self.prefix_padding_ms = self.prefix_padding_ms.min(2_000);
        self.silence_duration_ms = self.silence_duration_ms.clamp(100, 5_000);

        let r = &mut self.reconnect;
        r.initial_delay_ms = r.initial_delay_ms.clamp(50, 60_000);
        r.max_delay_ms = r.max_delay_ms.clamp(r.initial_delay_ms, 300_000);
        r.multiplier = r.multiplier.clamp(1.0, 10.0);

        let a = &mut self.audio;
        a.sample_rate = a.sample_rate.clamp(8_000, 48_000);
        a.chunk_duration_ms = a.chunk_duration_ms.clamp(10, 100);
        a.preroll_duration_sec = a.preroll_duration_sec.clamp(0.0, 2.0);
        a.cross_fade_samples = a.cross_fade_samples.min(a.sample_rate as usize / 10);
        a.min_buffer_fill = a.min_buffer_fill.min(64);
        a.silence_ratio = a.silence_ratio.clamp(1.0, 20.0);
        a.min_speech_frames = a.min_speech_frames.clamp(1, 50);
        a.min_silence_frames = a.min_silence_frames.clamp(1, 250);
        for name in [&mut a.input_device, &mut a.output_device] {
            if name.as_deref().is_some_and(|n| n.trim().is_empty()) {
                *name = None;
            }
        }
    }

    pub fn connection_target(&self) -> Result<ConnectionTarget> {
        if self.api_key.trim().is_empty() {
            return Err(RealtimeError::Config(format!(
                "no API key (set apiKey or {API_KEY_ENV})"
            )));
        }
        if self.endpoint.trim().is_empty() {
            return Ok(ConnectionTarget::Direct {
                url: self.url.clone(),
                api_key: self.api_key.clone(),
            });
        }
        if self.deployment.trim().is_empty() {
            return Err(RealtimeError::Config(
                "gateway endpoint requires a deployment".into(),
            ));
        }
        Ok(ConnectionTarget::Gateway {
            endpoint: self.endpoint.clone(),
            api_key: self.api_key.clone(),
            deployment: self.deployment.clone(),
            api_version: self.api_version.clone(),
        })
    }

    pub fn session_options(&self) -> Result<SessionOptions> {
        let mut options = SessionOptions::new(self.connection_target()?);
        options.model = self.model.clone();
        options.modalities = self.modalities.clone();
        options.instructions = self.instructions.clone();
        options.voice = self.voice.clone();
        options.input_audio_format = self.input_audio_format;
        options.output_audio_format = self.output_audio_format;
        options.input_audio_transcription = self
            .transcription_model
            .clone()
            .map(|model| InputTranscription { model });
        options.turn_detection = match self.turn_detection {
            TurnDetectionMode::Server => Some(TurnDetection::ServerVad {
                threshold: self.vad_threshold,
                prefix_padding_ms: self.prefix_padding_ms,
                silence_duration_ms: self.silence_duration_ms,
            }),
            TurnDetectionMode::Client => None,
        };
        options.tools = self.tools.clone();
        options.tool_choice = self.tool_choice.clone();
        options.temperature = self.temperature;
        options.max_output_tokens = self.max_output_tokens;
        options.enable_auto_reconnect = self.enable_auto_reconnect;
        Ok(options)
    }

    pub fn stream_options(&self) -> AudioStreamOptions {
        AudioStreamOptions {
            sample_rate: self.audio.sample_rate,
            ..AudioStreamOptions::default()
        }
    }

    pub fn capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            chunk_duration_ms: self.audio.chunk_duration_ms,
            preroll_duration_sec: self.audio.preroll_duration_sec,
            cross_fade_samples: self.audio.cross_fade_samples,
            preferred_device: self.audio.input_device.clone(),
        }
    }

    pub fn playback_config(&self) -> PlaybackConfig {
        PlaybackConfig {
            queue_capacity: self.audio.queue_capacity,
            min_buffer_fill: self.audio.min_buffer_fill,
            preferred_device: self.audio.output_device.clone(),
        }
    }

    pub fn energy_vad_config(&self) -> EnergyVadConfig {
        EnergyVadConfig {
            silence_ratio: self.audio.silence_ratio,
            min_speech_frames: self.audio.min_speech_frames,
            min_silence_frames: self.audio.min_silence_frames,
            ..EnergyVadConfig::default()
        }
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts: self.reconnect.max_attempts,
            initial_delay: Duration::from_millis(self.reconnect.initial_delay_ms),
            max_delay: Duration::from_millis(self.reconnect.max_delay_ms),
            multiplier: self.reconnect.multiplier,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::collections::HashMap;

    #[test]
    fn empty_file_yields_defaults() {
        let config = ClientConfig::from_json("{}").unwrap();
        assert!(config == ClientConfig::default());
    }

    #[test]
    fn camel_case_fields_are_read() {
        let config = ClientConfig::from_json(
            r#"{"apiKey":"sk-file","turnDetection":"client","maxOutputTokens":512,
                "audio":{"minBufferFill":5,"inputDevice":"USB Mic"}}"#,
        )
        .unwrap();
        assert_eq!(config.api_key, "sk-file");
        assert_eq!(config.turn_detection, TurnDetectionMode::Client);
        assert_eq!(config.max_output_tokens, MaxOutputTokens::Limited(512));
        assert_eq!(config.audio.min_buffer_fill, 5);
        assert_eq!(config.audio.input_device.as_deref(), Some("USB Mic"));
        assert_eq!(config.audio.queue_capacity, 256);
    }

    #[test]
    fn bad_json_is_a_config_error() {
        let err = ClientConfig::from_json(r#"{"temperature":"hot"}"#).err().unwrap();
        assert!(matches!(err, RealtimeError::Config(_)));
    }

    #[test]
    fn environment_overrides_file_values() {
        let env: HashMap<&str, &str> =
            HashMap::from([(API_KEY_ENV, "sk-env"), (ENDPOINT_ENV, "  ")]);
        let mut config = ClientConfig {
            api_key: "sk-file".into(),
            ..ClientConfig::default()
        };
        config.apply_overrides(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.api_key, "sk-env");
        assert!(config.endpoint.is_empty());
    }

    #[test]
    fn normalize_clamps_ranges() {
        let mut config = ClientConfig {
            temperature: 3.0,
            vad_threshold: -1.0,
            model: " ".into(),
            modalities: Vec::new(),
            ..ClientConfig::default()
        };
        config.reconnect.initial_delay_ms = 5_000;
        config.reconnect.max_delay_ms = 10;
        config.audio.sample_rate = 1;
        config.audio.output_device = Some(String::new());
        config.normalize();

        assert_relative_eq!(config.temperature, 1.2);
        assert_relative_eq!(config.vad_threshold, 0.0);
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.modalities.len(), 2);
        assert_eq!(config.reconnect.max_delay_ms, 5_000);
        assert_eq!(config.audio.sample_rate, 8_000);
        assert!(config.audio.output_device.is_none());
    }

    #[test]
    fn missing_key_is_rejected() {
        let err = ClientConfig::default().session_options().unwrap_err();
        assert!(matches!(err, RealtimeError::Config(_)));
    }

    #[test]
    fn gateway_needs_deployment() {
        let config = ClientConfig {
            api_key: "k".into(),
            endpoint: "https://example.invalid".into(),
            ..ClientConfig::default()
        };
        assert!(config.connection_target().is_err());

        let config = ClientConfig {
            deployment: "rt".into(),
            ..config
        };
        assert!(matches!(
            config.connection_target().unwrap(),
            ConnectionTarget::Gateway { .. }
        ));
    }

    #[test]
    fn client_turn_detection_clears_server_vad() {
        let config = ClientConfig {
            api_key: "k".into(),
            turn_detection: TurnDetectionMode::Client,
            transcription_model: Some("whisper-1".into()),
            ..ClientConfig::default()
        };
        let options = config.session_options().unwrap();
        assert!(options.is_client_turn_detection());
        assert_eq!(
            options.input_audio_transcription,
            Some(InputTranscription {
                model: "whisper-1".into()
            })
        );
    }

    #[test]
    fn derived_configs_follow_audio_section() {
        let mut config = ClientConfig::default();
        config.audio.queue_capacity = 0;
        config.audio.min_silence_frames = 40;
        config.reconnect.max_attempts = 0;
        assert_eq!(config.playback_config().queue_capacity, 0);
        assert_eq!(config.energy_vad_config().min_silence_frames, 40);
        assert_eq!(config.reconnect_policy().max_attempts, 0);
        assert_eq!(config.stream_options().sample_rate, 24_000);
    }
}
