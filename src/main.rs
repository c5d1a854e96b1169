use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use junin::chat::OpenAiChat;
use junin::config::AudioConfig;
use junin::realtime::{RealtimeSession, SessionSettings};
use junin::events::{AssistantEvent, EventSender};
use junin::voice::{
    CaptureEngine, CpalHost, DeviceSelection, InputArbiter, NoiseCalibrator, OpenAiSpeech,
    PlaybackStreamManager, SpellcheckTranscriber, Transcriber, WhisperTranscriber, list_devices,
    load_terms,
};
use junin::{Assistant, AudioContext, Config, TaskRegistry};

/// Junin - desktop voice assistant
#[derive(Parser)]
#[command(name = "junin", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Input device name (overrides config)
    #[arg(long, env = "JUNIN_INPUT_DEVICE")]
    input: Option<String>,

    /// Output device name (overrides config)
    #[arg(long, env = "JUNIN_OUTPUT_DEVICE")]
    output: Option<String>,

    /// Skip ambient noise calibration and use the default threshold
    #[arg(long)]
    no_calibrate: bool,

    /// Print replies instead of speaking them (type `speak` to turn speech back on)
    #[arg(long)]
    mute: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// List audio input and output devices
    Devices,
    /// Measure ambient noise and print the speech threshold
    Calibrate,
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
    /// Speak text through the TTS pipeline
    Say {
        /// Text to speak
        #[arg(default_value = "Olá! Este é um teste do sistema de voz.")]
        text: String,
    },
    /// Talk to the realtime API with live duplex audio
    Realtime,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info",
        1 => "info,junin=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load();
    if cli.input.is_some() {
        config.input_device = DeviceSelection::from_name(cli.input);
    }
    if cli.output.is_some() {
        config.output_device = DeviceSelection::from_name(cli.output);
    }
    if cli.mute {
        config.voice.speak_replies = false;
    }
    tracing::debug!(audio = ?config.audio, "loaded configuration");

    match cli.command {
        Some(Command::Devices) => devices(),
        Some(Command::Calibrate) => calibrate(&config).await,
        Some(Command::TestMic { duration }) => test_mic(&config, duration).await,
        Some(Command::TestSpeaker) => test_speaker(&config).await,
        Some(Command::Say { text }) => say(&config, text).await,
        Some(Command::Realtime) => realtime(&config).await,
        None => assistant(config, !cli.no_calibrate).await,
    }
}

/// Run the assistant with voice detection until Ctrl-C
async fn assistant(config: Config, calibrate: bool) -> anyhow::Result<()> {
    let key = config.openai_key()?.to_string();
    let (events_tx, events_rx) = junin::events::channel();

    let synthesizer = Arc::new(OpenAiSpeech::new(key.clone(), &config.voice)?);
    let context = Arc::new(AudioContext::new(
        &config,
        Arc::new(CpalHost),
        Arc::new(CpalHost),
        synthesizer,
        events_tx.clone(),
    )?);

    let mut tasks = TaskRegistry::with_builtins();
    if let Some(dir) = &config.tasks_dir {
        let loaded = tasks.load_dir(dir);
        tracing::info!(loaded, path = %dir.display(), "task manifests loaded");
    }

    let whisper: Arc<dyn Transcriber> = Arc::new(WhisperTranscriber::new(
        key.clone(),
        config.voice.stt_model.clone(),
        config.voice.language.clone(),
    )?);
    let transcriber: Arc<dyn Transcriber> = if config.voice.spellcheck {
        let terms = config
            .voice
            .spelling_terms
            .as_deref()
            .map(load_terms)
            .unwrap_or_default();
        let corrector = Arc::new(OpenAiChat::new(key.clone(), config.chat.model.clone())?.plain_text());
        Arc::new(SpellcheckTranscriber::new(whisper, corrector, terms))
    } else {
        whisper
    };
    let model = Arc::new(OpenAiChat::new(key, config.chat.model.clone())?);
    let assistant = Assistant::new(
        Arc::clone(&context),
        transcriber,
        model,
        tasks,
        &config.chat.system_prompt,
        events_tx.clone(),
    )?
    .with_speech(config.voice.speak_replies);
    tokio::spawn(console_commands(events_tx));

    let vad = if config.vad_enabled {
        let context = Arc::clone(&context);
        Some(tokio::task::spawn_blocking(move || context.start_vad(calibrate)).await??)
    } else {
        tracing::warn!("voice detection disabled in config, nothing will be recorded");
        None
    };

    tracing::info!(
        voice_detection = context.arbiter().is_recording_vad(),
        "junin ready, start talking"
    );
    assistant.run(events_rx, shutdown_signal()).await;

    tokio::task::spawn_blocking(move || {
        drop(vad);
        context.shutdown();
    })
    .await?;
    Ok(())
}

/// Read `mute` and `speak` commands from stdin
async fn console_commands(events: EventSender) {
    use tokio::io::AsyncBufReadExt;

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(error = %e, "console input closed");
                break;
            }
        };
        let enabled = match line.trim() {
            "mute" => false,
            "speak" => true,
            "" => continue,
            other => {
                tracing::warn!(command = other, "unknown command, expected 'mute' or 'speak'");
                continue;
            }
        };
        if events.send(AssistantEvent::SetSpeech { enabled }).is_err() {
            break;
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

/// Print input and output devices
fn devices() -> anyhow::Result<()> {
    let devices = list_devices()?;
    println!("Input devices:");
    for name in &devices.inputs {
        println!("  {name}");
    }
    println!("\nOutput devices:");
    for name in &devices.outputs {
        println!("  {name}");
    }
    Ok(())
}

fn capture_engine(config: &Config, audio: AudioConfig) -> CaptureEngine {
    let (events, _) = junin::events::channel();
    CaptureEngine::new(
        Arc::new(CpalHost),
        InputArbiter::new(),
        audio,
        config.input_device.clone(),
        events,
    )
}

/// Measure ambient noise
async fn calibrate(config: &Config) -> anyhow::Result<()> {
    let engine = capture_engine(config, config.audio.clone());
    let calibrator = NoiseCalibrator::from_config(&config.audio);
    println!(
        "Calibrating over {} frames, stay quiet...",
        calibrator.window()
    );

    let threshold = tokio::task::spawn_blocking(move || engine.calibrate()).await?;

    println!("Speech threshold: {threshold:.1}");
    Ok(())
}

/// Test microphone input with a volume meter
async fn test_mic(config: &Config, duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let engine = capture_engine(config, config.audio.clone());
    let noise_floor = config.audio.noise_floor;
    let frame_timeout = config.audio.frame_duration() * 2;

    tokio::task::spawn_blocking(move || -> junin::Result<()> {
        let mut source = engine.open_source()?;
        println!("Device: {}", source.device_name());
        println!("---");

        let deadline = Instant::now() + Duration::from_secs(duration);
        let mut second = Instant::now();
        let mut peak = 0.0f32;
        let mut elapsed = 0;
        while Instant::now() < deadline {
            if let Some(frame) = source.read_frame(frame_timeout)? {
                peak = peak.max(frame.volume(noise_floor));
            }
            if second.elapsed() >= Duration::from_secs(1) {
                elapsed += 1;
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let meter_len = (peak / 100.0).min(50.0) as usize;
                let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);
                println!("[{elapsed:2}s] volume: {peak:8.1} | [{meter}]");
                peak = 0.0;
                second = Instant::now();
            }
        }
        Ok(())
    })
    .await??;

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If the volume stayed at 0, check the input device with `junin devices`.");
    Ok(())
}

/// Test speaker output with a sine wave
async fn test_speaker(config: &Config) -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let playback = PlaybackStreamManager::new(
        Arc::new(CpalHost),
        &config.audio,
        config.output_device.clone(),
    );

    let sample_rate = playback.sample_rate();
    let frequency = 440.0_f32;
    let num_samples = sample_rate as usize * 2;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..num_samples)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 // 30% volume
        })
        .collect();

    println!("Playing {} samples at {} Hz...", samples.len(), sample_rate);

    tokio::task::spawn_blocking(move || -> junin::Result<()> {
        let stop = AtomicBool::new(false);
        playback.play_chunks(&samples, &stop)?;
        let _ = playback.finish(&stop);
        playback.drain(&stop, Duration::from_secs(5));
        playback.cleanup();
        Ok(())
    })
    .await??;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check the output device with `junin devices`.");
    Ok(())
}

/// Speak text through synthesis and playback
async fn say(config: &Config, text: String) -> anyhow::Result<()> {
    let key = config.openai_key()?.to_string();
    let (events, _) = junin::events::channel();
    let context = AudioContext::new(
        config,
        Arc::new(CpalHost),
        Arc::new(CpalHost),
        Arc::new(OpenAiSpeech::new(key, &config.voice)?),
        events,
    )?;

    let report = tokio::task::spawn_blocking(move || {
        let report = context.speech().speak(&text);
        context.shutdown();
        report
    })
    .await??;

    println!(
        "Spoke {} of {} sentences ({} skipped)",
        report.played, report.sentences, report.skipped
    );
    Ok(())
}

/// Duplex conversation with the realtime API
async fn realtime(config: &Config) -> anyhow::Result<()> {
    let key = config.openai_key()?.to_string();

    // Both directions run at the realtime rate
    let audio = AudioConfig {
        capture_sample_rate: config.audio.realtime_sample_rate,
        playback_sample_rate: config.audio.realtime_sample_rate,
        ..config.audio.clone()
    };
    let engine = Arc::new(capture_engine(config, audio.clone()));
    let playback = Arc::new(PlaybackStreamManager::new(
        Arc::new(CpalHost),
        &audio,
        config.output_device.clone(),
    ));

    let session = RealtimeSession::new(
        &config.realtime,
        key,
        SessionSettings::pcm16(
            Some(config.chat.system_prompt.clone()),
            Some(config.voice.tts_voice.clone()),
        ),
    )?;

    println!("Realtime session starting, press Ctrl-C to stop");
    session
        .run(engine, Arc::clone(&playback), shutdown_signal())
        .await?;

    tokio::task::spawn_blocking(move || playback.cleanup()).await?;
    Ok(())
}
