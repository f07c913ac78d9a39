//! Recurrent neural VAD (Silero-style ONNX model).
//!
//! Audio is resampled to 16 kHz and scored in 512-sample windows. The
//! recurrent state is carried across `process_chunk` calls and only zeroed by
//! [`VoiceActivityDetector::reset`].
//!
//! ## Model I/O
//!
//! | Name            | Shape      | DType | Direction |
//! |-----------------|------------|-------|-----------|
//! | `input`         | `[1, 512]` | f32   | in        |
//! | `sr`            | `[1]`      | i64   | in        |
//! | `h` / `c`       | `[2,1,64]` | f32   | in/out (LSTM export) |
//! | `state`         | `[2,1,128]`| f32   | in/out (GRU export)  |
//! | `output`        | `[1, 1]`   | f32   | out       |

use std::path::{Path, PathBuf};

use ndarray::{Array1, Array2, Array3};
use ort::session::builder::SessionBuilder;
use ort::session::SessionInputValue;
use ort::value::Value;
use tracing::{info, warn};

use super::{Hysteresis, VadTransition, VoiceActivityDetector};
use crate::audio::resample::RateConverter;
use crate::buffering::chunk::AudioChunk;
use crate::error::{RealtimeError, Result};

/// Model sample rate.
const MODEL_RATE: u32 = 16_000;
/// Samples per inference window at 16 kHz (32 ms).
const WINDOW: usize = 512;
/// Resampler input block per call.
const RESAMPLE_BLOCK: usize = 480;

/// Tuning for [`NeuralVad`].
#[derive(Debug, Clone)]
pub struct NeuralVadConfig {
    pub model_path: PathBuf,
    /// Speech probability threshold in [0, 1]. Default: `0.5`.
    pub threshold: f32,
    pub min_speech_frames: u32,
    pub min_silence_frames: u32,
}

impl Default for NeuralVadConfig {
    fn default() -> Self {
        Self {
            model_path: NeuralVad::default_model_path(),
            threshold: 0.5,
            min_speech_frames: 2,
            min_silence_frames: 15,
        }
    }
}

/// Recurrent state carried between windows.
enum HiddenState {
    /// Two tensors, `h` and `c`, each `[2, 1, 64]`.
    Lstm {
        h: Vec<f32>,
        c: Vec<f32>,
        names: [String; 4],
    },
    /// One `[2, 1, 128]` tensor.
    Gru {
        state: Vec<f32>,
        names: [String; 2],
    },
}

impl HiddenState {
    fn zero(&mut self) {
        match self {
            HiddenState::Lstm { h, c, .. } => {
                h.fill(0.0);
                c.fill(0.0);
            }
            HiddenState::Gru { state, .. } => state.fill(0.0),
        }
    }
}

/// Neural voice activity detector.
pub struct NeuralVad {
    session: ort::session::Session,
    input_name: String,
    sr_name: Option<String>,
    output_name: String,
    hidden: HiddenState,
    threshold: f32,
    hysteresis: Hysteresis,
    resampler: Option<(u32, RateConverter)>,
    pending: Vec<f32>,
}

fn onnx_err(e: impl std::fmt::Display) -> RealtimeError {
    RealtimeError::Inference(e.to_string())
}

impl NeuralVad {
    /// Load the model described by `config`.
    pub fn new(config: NeuralVadConfig) -> Result<Self> {
        let path = config.model_path.as_path();
        if !path.exists() {
            return Err(RealtimeError::ModelNotFound {
                path: path.to_path_buf(),
            });
        }

        let session = SessionBuilder::new()
            .map_err(onnx_err)?
            .commit_from_file(path)
            .map_err(onnx_err)?;

        let inputs: Vec<String> = session
            .inputs()
            .iter()
            .map(|outlet| outlet.name().to_string())
            .collect();
        let outputs: Vec<String> = session
            .outputs()
            .iter()
            .map(|outlet| outlet.name().to_string())
            .collect();

        let input_name = pick(&inputs, &["input", "audio", "x"])
            .or_else(|| inputs.first().cloned())
            .ok_or_else(|| onnx_err("VAD model has no inputs"))?;
        let output_name = pick(&outputs, &["output", "speech_prob", "prob"])
            .or_else(|| outputs.first().cloned())
            .ok_or_else(|| onnx_err("VAD model has no outputs"))?;
        let sr_name = pick(&inputs, &["sr", "sample_rate"]);

        let hidden = match (
            pick(&inputs, &["h"]),
            pick(&inputs, &["c"]),
            pick(&outputs, &["hn"]),
            pick(&outputs, &["cn"]),
        ) {
            (Some(h), Some(c), Some(hn), Some(cn)) => HiddenState::Lstm {
                h: vec![0.0; 128],
                c: vec![0.0; 128],
                names: [h, c, hn, cn],
            },
            _ => {
                let state_in = pick(&inputs, &["state"])
                    .ok_or_else(|| onnx_err("VAD model exposes no recurrent state"))?;
                let state_out = pick(&outputs, &["stateN", "state_out"])
                    .ok_or_else(|| onnx_err("VAD model exposes no recurrent state output"))?;
                HiddenState::Gru {
                    state: vec![0.0; 256],
                    names: [state_in, state_out],
                }
            }
        };

        info!(
            path = %path.display(),
            threshold = config.threshold,
            lstm = matches!(hidden, HiddenState::Lstm { .. }),
            "neural VAD loaded"
        );

        Ok(Self {
            session,
            input_name,
            sr_name,
            output_name,
            hidden,
            threshold: config.threshold.clamp(0.0, 1.0),
            hysteresis: Hysteresis::new(config.min_speech_frames, config.min_silence_frames),
            resampler: None,
            pending: Vec::new(),
        })
    }

    /// `$VOXWIRE_MODELS_DIR/silero_vad.onnx`, or `./models/silero_vad.onnx`.
    pub fn default_model_path() -> PathBuf {
        std::env::var_os("VOXWIRE_MODELS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| Path::new("models").to_path_buf())
            .join("silero_vad.onnx")
    }

    fn to_model_rate(&mut self, chunk: &AudioChunk) -> Result<Vec<f32>> {
        if chunk.sample_rate == MODEL_RATE {
            return Ok(chunk.samples.clone());
        }
        let stale = self
            .resampler
            .as_ref()
            .map(|(rate, _)| *rate != chunk.sample_rate)
            .unwrap_or(true);
        if stale {
            let rc = RateConverter::new(chunk.sample_rate, MODEL_RATE, RESAMPLE_BLOCK)?;
            self.resampler = Some((chunk.sample_rate, rc));
        }
        match self.resampler.as_mut() {
            Some((_, rc)) => Ok(rc.process(&chunk.samples)),
            None => Ok(Vec::new()),
        }
    }

    /// Score one 512-sample window and advance the hidden state.
    fn score_window(&mut self, window: Vec<f32>) -> Result<f32> {
        let input = Value::from_array(Array2::from_shape_vec((1, WINDOW), window).map_err(onnx_err)?)
            .map_err(onnx_err)?;
        let mut feeds: Vec<(String, SessionInputValue<'_>)> =
            vec![(self.input_name.clone(), input.into())];

        if let Some(sr_name) = &self.sr_name {
            let sr = Value::from_array(Array1::<i64>::from_elem(1, MODEL_RATE as i64))
                .map_err(onnx_err)?;
            feeds.push((sr_name.clone(), sr.into()));
        }

        match &self.hidden {
            HiddenState::Lstm { h, c, names } => {
                let h = Value::from_array(Array3::from_shape_vec((2, 1, 64), h.clone()).map_err(onnx_err)?)
                    .map_err(onnx_err)?;
                let c = Value::from_array(Array3::from_shape_vec((2, 1, 64), c.clone()).map_err(onnx_err)?)
                    .map_err(onnx_err)?;
                feeds.push((names[0].clone(), h.into()));
                feeds.push((names[1].clone(), c.into()));
            }
            HiddenState::Gru { state, names } => {
                let s = Value::from_array(
                    Array3::from_shape_vec((2, 1, 128), state.clone()).map_err(onnx_err)?,
                )
                .map_err(onnx_err)?;
                feeds.push((names[0].clone(), s.into()));
            }
        }

        let outputs = self.session.run(feeds).map_err(onnx_err)?;

        let prob = match outputs.get(self.output_name.as_str()) {
            Some(out) => {
                let (_, data) = out.try_extract_tensor::<f32>().map_err(onnx_err)?;
                data.first().copied().unwrap_or(0.0)
            }
            None => return Err(onnx_err("VAD model produced no probability output")),
        };

        match &mut self.hidden {
            HiddenState::Lstm { h, c, names } => {
                if let (Some(hn), Some(cn)) =
                    (outputs.get(names[2].as_str()), outputs.get(names[3].as_str()))
                {
                    let (_, hn) = hn.try_extract_tensor::<f32>().map_err(onnx_err)?;
                    let (_, cn) = cn.try_extract_tensor::<f32>().map_err(onnx_err)?;
                    *h = hn.to_vec();
                    *c = cn.to_vec();
                } else {
                    warn!("neural VAD returned no LSTM state; state not advanced");
                }
            }
            HiddenState::Gru { state, names } => {
                if let Some(out) = outputs.get(names[1].as_str()) {
                    let (_, data) = out.try_extract_tensor::<f32>().map_err(onnx_err)?;
                    *state = data.to_vec();
                } else {
                    warn!("neural VAD returned no GRU state; state not advanced");
                }
            }
        }

        Ok(prob)
    }
}

fn pick(candidates: &[String], preferred: &[&str]) -> Option<String> {
    preferred.iter().find_map(|needle| {
        candidates
            .iter()
            .find(|name| name.eq_ignore_ascii_case(needle))
            .cloned()
    })
}

impl VoiceActivityDetector for NeuralVad {
    fn process_chunk(&mut self, chunk: &AudioChunk) -> Result<VadTransition> {
        let samples = self.to_model_rate(chunk)?;
        self.pending.extend_from_slice(&samples);

        let mut result = self.hysteresis.current();
        while self.pending.len() >= WINDOW {
            let window: Vec<f32> = self.pending.drain(..WINDOW).collect();
            let prob = self.score_window(window)?;
            let step = self.hysteresis.update(prob >= self.threshold);
            if step.transitioned {
                result = step;
            } else if !result.transitioned {
                result = step;
            }
        }
        Ok(result)
    }

    fn reset(&mut self) {
        self.hidden.zero();
        self.hysteresis.reset();
        self.pending.clear();
        self.resampler = None;
    }
}
