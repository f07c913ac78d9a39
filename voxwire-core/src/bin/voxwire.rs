use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context};
use serde_json::{json, Value};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use voxwire_core::audio::device::{list_devices, DeviceDirection};
use voxwire_core::config::{TurnDetectionMode, VadKind};
use voxwire_core::protocol::session::ToolDefinition;
use voxwire_core::{
    AudioCapture, AudioOutput, AudioPlayback, BlockingExecutor, ClientConfig, ConversationHandler,
    EnergyVad, OutputChunk, OutputSink, RealtimeClient, Role, VoiceActivityDetector,
};

const CLOCK_TOOL: &str = "get_current_time";

#[derive(Debug, Default)]
struct Args {
    config: Option<PathBuf>,
    text: Option<String>,
    no_mic: bool,
    no_speaker: bool,
    client_vad: bool,
    list_devices: bool,
}

fn parse_args() -> Result<Args, String> {
    let mut args = Args::default();
    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--config" => {
                let Some(v) = it.next() else {
                    return Err("missing value for --config".into());
                };
                args.config = Some(PathBuf::from(v));
            }
            "--text" => {
                let Some(v) = it.next() else {
                    return Err("missing value for --text".into());
                };
                args.text = Some(v);
            }
            "--no-mic" => args.no_mic = true,
            "--no-speaker" => args.no_speaker = true,
            "--client-vad" => args.client_vad = true,
            "--list-devices" => args.list_devices = true,
            "--help" | "-h" => {
                println!(
                    "Usage: voxwire [--config <file.json>] [--text <prompt>] \\
  [--no-mic] [--no-speaker] [--client-vad] [--list-devices]

Environment: OPENAI_API_KEY, VOXWIRE_ENDPOINT, RUST_LOG"
                );
                std::process::exit(0);
            }
            other => return Err(format!("unknown argument: {other}")),
        }
    }
    Ok(args)
}

/// Prints assistant text and transcripts as they stream in.
struct ConsoleSink;

impl OutputSink for ConsoleSink {
    fn emit(&self, role: Role, chunk: OutputChunk) {
        match chunk {
            OutputChunk::Text(text) | OutputChunk::Transcript(text) => match role {
                Role::Assistant => {
                    print!("{text}");
                    let _ = std::io::stdout().flush();
                }
                _ => println!("\n[{role}] {text}"),
            },
            OutputChunk::Audio(_) => {}
        }
    }

    fn error(&self, message: &str) {
        eprintln!("\n[error] {message}");
    }

    fn response_done(&self, _response_id: &str, status: &str) {
        if status == "completed" {
            println!();
        } else {
            println!("\n[response {status}]");
        }
    }
}

fn run_tool(name: &str, _arguments: Value) -> anyhow::Result<Value> {
    match name {
        CLOCK_TOOL => {
            let secs = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();
            Ok(json!({ "unix_time": secs }))
        }
        other => bail!("unknown tool {other}"),
    }
}

fn build_vad(config: &ClientConfig) -> anyhow::Result<Box<dyn VoiceActivityDetector>> {
    match config.audio.vad {
        VadKind::Energy => Ok(Box::new(EnergyVad::new(config.energy_vad_config()))),
        #[cfg(feature = "onnx")]
        VadKind::Neural => {
            use voxwire_core::vad::neural::NeuralVadConfig;
            let vad = voxwire_core::NeuralVad::new(NeuralVadConfig::default())
                .context("loading neural VAD")?;
            Ok(Box::new(vad))
        }
        #[cfg(not(feature = "onnx"))]
        VadKind::Neural => {
            warn!("neural VAD requires the 'onnx' feature, using energy VAD");
            Ok(Box::new(EnergyVad::new(config.energy_vad_config())))
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("voxwire=info")),
        )
        .init();

    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{e} (see --help)");
            std::process::exit(2);
        }
    };

    if let Err(e) = run(args).await {
        eprintln!("voxwire failed: {e:#}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    if args.list_devices {
        for direction in [DeviceDirection::Input, DeviceDirection::Output] {
            for device in list_devices(direction) {
                let marker = if device.is_default { " (default)" } else { "" };
                println!("{:?}: {}{marker}", device.direction, device.name);
            }
        }
        return Ok(());
    }

    let mut config = match &args.config {
        Some(path) => ClientConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ClientConfig::from_env(),
    };
    if args.client_vad {
        config.turn_detection = TurnDetectionMode::Client;
    }

    let mut options = config.session_options()?;
    if !options.tools.iter().any(|t| t.name == CLOCK_TOOL) {
        options.tools.push(ToolDefinition::function(
            CLOCK_TOOL,
            "Current time as seconds since the Unix epoch.",
            json!({ "type": "object", "properties": {} }),
        ));
    }

    let playback = if args.no_speaker {
        None
    } else {
        let playback = Arc::new(AudioPlayback::with_default_device(
            config.stream_options(),
            &config.playback_config(),
        ));
        playback.start().context("starting playback")?;
        Some(playback)
    };

    let handler = ConversationHandler::new(Arc::new(ConsoleSink))
        .with_executor(Arc::new(BlockingExecutor::new(run_tool)));
    let mut builder = RealtimeClient::builder(options, Arc::new(handler))
        .reconnect_policy(config.reconnect_policy());
    if let Some(playback) = &playback {
        builder = builder.audio_output(playback.clone() as Arc<dyn AudioOutput>);
    }
    let client = builder.build();

    let mut status = client.subscribe_status();
    tokio::spawn(async move {
        while let Ok(event) = status.recv().await {
            info!(status = ?event.status, detail = event.detail.as_deref().unwrap_or(""), "session status");
        }
    });

    client.start().await.context("starting session")?;

    let capture = if args.no_mic {
        None
    } else {
        let vad = if client.is_client_turn_detection() {
            Some(build_vad(&config)?)
        } else {
            None
        };
        let capture = AudioCapture::new(
            config.stream_options(),
            config.capture_config(),
            vad,
            client.capture_sink(),
        );
        capture.start().context("starting microphone")?;
        Some(capture)
    };

    if let Some(text) = &args.text {
        client.send_text(text, Role::User, true).await?;
    }

    info!("session running, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    if let Some(capture) = &capture {
        capture.stop(true);
    }
    client.stop().await;
    if let Some(playback) = &playback {
        playback.stop();
    }
    let diag = client.diagnostics();
    info!(
        frames = diag.frames_received,
        dropped = diag.frames_dropped,
        sent = diag.events_sent,
        reconnects = diag.reconnects,
        "session closed"
    );
    Ok(())
}
