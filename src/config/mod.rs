//! Configuration management for junin
//!
//! Values are layered env > TOML file > defaults. Audio tunables live in
//! [`AudioConfig`]; everything the pipeline reads is a named field there.

pub mod file;

use std::path::PathBuf;
use std::time::Duration;

use crate::voice::DeviceSelection;

/// Capture sample rate for transcription recordings (Hz)
pub const DEFAULT_CAPTURE_SAMPLE_RATE: u32 = 16_000;

/// Playback sample rate, matching the synthesized speech (Hz)
pub const DEFAULT_PLAYBACK_SAMPLE_RATE: u32 = 24_000;

/// Sample rate used on the realtime duplex path, both directions (Hz)
pub const DEFAULT_REALTIME_SAMPLE_RATE: u32 = 24_000;

/// Samples per capture frame
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Samples per playback chunk
pub const DEFAULT_PLAYBACK_CHUNK_SIZE: usize = 2048;

/// Channel count for capture and playback
pub const DEFAULT_CHANNELS: u16 = 1;

/// Frame volumes below this are clamped to zero
pub const DEFAULT_NOISE_FLOOR: f32 = 100.0;

/// Calibrated ambient volume is multiplied by this to get the threshold
pub const DEFAULT_VOLUME_MULTIPLIER: f32 = 3.0;

/// How long volume must stay above threshold before speech is confirmed
pub const DEFAULT_DETECTION_TIME: Duration = Duration::from_millis(200);

/// Grace period of silence after speech before a recording closes
pub const DEFAULT_RECORD_TIME_AFTER_DETECTION: Duration = Duration::from_secs(2);

/// Number of frames sampled during noise calibration
pub const DEFAULT_MOVING_AVERAGE_WINDOW: usize = 50;

/// Threshold used when calibration is skipped or fails
pub const DEFAULT_THRESHOLD: f32 = 200.0;

/// Capacity of the playback queue, in chunks
pub const DEFAULT_PLAYBACK_BUFFER_CHUNKS: usize = 10;

/// Max wait when enqueueing a playback chunk before it is dropped
pub const DEFAULT_ENQUEUE_TIMEOUT: Duration = Duration::from_secs(1);

/// Length of the fade applied when playback is cut short (samples)
pub const DEFAULT_FADE_OUT_SAMPLES: usize = 512;

/// Worker threads used for parallel sentence synthesis
pub const DEFAULT_SYNTHESIS_WORKERS: usize = 5;

/// Max wait for one sentence's audio before it is skipped
pub const DEFAULT_SENTENCE_TIMEOUT: Duration = Duration::from_secs(10);

/// Audio pipeline tunables
#[derive(Debug, Clone, PartialEq)]
pub struct AudioConfig {
    /// Capture sample rate for transcription recordings (Hz)
    pub capture_sample_rate: u32,

    /// Playback sample rate (Hz)
    pub playback_sample_rate: u32,

    /// Realtime duplex sample rate (Hz)
    pub realtime_sample_rate: u32,

    /// Samples per capture frame
    pub chunk_size: usize,

    /// Samples per playback chunk
    pub playback_chunk_size: usize,

    /// Channel count (mono)
    pub channels: u16,

    /// Volume floor; quieter frames count as silence
    pub noise_floor: f32,

    /// Multiplier applied to the calibrated ambient volume
    pub volume_multiplier: f32,

    /// Continuous time above threshold needed to confirm speech
    pub detection_time: Duration,

    /// Silence tolerated after speech before the recording closes
    pub record_time_after_detection: Duration,

    /// Frames sampled during calibration
    pub moving_average_window: usize,

    /// Fallback threshold when calibration is unavailable
    pub default_threshold: f32,

    /// Playback queue capacity (chunks)
    pub playback_buffer_chunks: usize,

    /// Bounded wait when enqueueing a playback chunk
    pub enqueue_timeout: Duration,

    /// Fade length when playback is interrupted (samples)
    pub fade_out_samples: usize,

    /// Sentence synthesis worker threads
    pub synthesis_workers: usize,

    /// Max wait for a single sentence's audio
    pub sentence_timeout: Duration,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            capture_sample_rate: DEFAULT_CAPTURE_SAMPLE_RATE,
            playback_sample_rate: DEFAULT_PLAYBACK_SAMPLE_RATE,
            realtime_sample_rate: DEFAULT_REALTIME_SAMPLE_RATE,
            chunk_size: DEFAULT_CHUNK_SIZE,
            playback_chunk_size: DEFAULT_PLAYBACK_CHUNK_SIZE,
            channels: DEFAULT_CHANNELS,
            noise_floor: DEFAULT_NOISE_FLOOR,
            volume_multiplier: DEFAULT_VOLUME_MULTIPLIER,
            detection_time: DEFAULT_DETECTION_TIME,
            record_time_after_detection: DEFAULT_RECORD_TIME_AFTER_DETECTION,
            moving_average_window: DEFAULT_MOVING_AVERAGE_WINDOW,
            default_threshold: DEFAULT_THRESHOLD,
            playback_buffer_chunks: DEFAULT_PLAYBACK_BUFFER_CHUNKS,
            enqueue_timeout: DEFAULT_ENQUEUE_TIMEOUT,
            fade_out_samples: DEFAULT_FADE_OUT_SAMPLES,
            synthesis_workers: DEFAULT_SYNTHESIS_WORKERS,
            sentence_timeout: DEFAULT_SENTENCE_TIMEOUT,
        }
    }
}

impl AudioConfig {
    /// Wall-clock length of one capture frame at the capture rate
    #[must_use]
    pub fn frame_duration(&self) -> Duration {
        frame_duration(self.chunk_size, self.capture_sample_rate)
    }
}

/// Duration of `samples` mono samples at `sample_rate`, computed in whole
/// nanoseconds so frame timestamps add up exactly
#[must_use]
pub fn frame_duration(samples: usize, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    Duration::from_nanos(samples as u64 * 1_000_000_000 / u64::from(sample_rate))
}

/// Voice collaborator configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// STT model (e.g. "whisper-1")
    pub stt_model: String,

    /// TTS model (e.g. "tts-1")
    pub tts_model: String,

    /// TTS voice identifier
    pub tts_voice: String,

    /// TTS speed multiplier (0.25 to 4.0)
    pub tts_speed: f32,

    /// TTS response format requested from the API ("mp3" or "pcm")
    pub tts_format: String,

    /// Language hint passed to transcription
    pub language: Option<String>,

    /// Speak replies aloud; when off they are only logged
    pub speak_replies: bool,

    /// Correct transcripts against the spelling term list
    pub spellcheck: bool,

    /// File with one known term per line
    pub spelling_terms: Option<PathBuf>,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            stt_model: "whisper-1".to_string(),
            tts_model: "tts-1".to_string(),
            tts_voice: "onyx".to_string(),
            tts_speed: 1.0,
            tts_format: "mp3".to_string(),
            language: None,
            speak_replies: true,
            spellcheck: false,
            spelling_terms: None,
        }
    }
}

/// Language model configuration
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Model identifier for chat completions
    pub model: String,

    /// Base system prompt; task descriptions are appended to it
    pub system_prompt: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

/// Base instructions sent ahead of the task catalog
const DEFAULT_SYSTEM_PROMPT: &str = "You are Junin, a desktop voice assistant. \
Always reply with a JSON object of the form {\"type\": <task name>, \"content\": <task content>}.";

/// Realtime duplex configuration
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// WebSocket endpoint
    pub url: String,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            url: "wss://api.openai.com/v1/realtime?model=gpt-4o-realtime-preview".to_string(),
        }
    }
}

/// API keys for external services
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    /// `OpenAI` API key (transcription, chat, TTS, realtime)
    pub openai: Option<String>,
}

/// Top-level configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Audio pipeline tunables
    pub audio: AudioConfig,

    /// STT/TTS settings
    pub voice: VoiceConfig,

    /// Language model settings
    pub chat: ChatConfig,

    /// Realtime duplex settings
    pub realtime: RealtimeConfig,

    /// API keys
    pub api_keys: ApiKeys,

    /// Selected input device
    pub input_device: DeviceSelection,

    /// Selected output device
    pub output_device: DeviceSelection,

    /// Directory scanned for task manifests
    pub tasks_dir: Option<PathBuf>,

    /// Start with voice activity detection armed
    pub vad_enabled: bool,
}

impl Config {
    /// Load configuration: env > TOML file > defaults
    #[must_use]
    pub fn load() -> Self {
        let fc = file::load_config_file();
        Self::from_file_config(fc, |key| std::env::var(key).ok())
    }

    /// Build configuration from a parsed file and an env lookup
    #[must_use]
    pub fn from_file_config(
        fc: file::JuninConfigFile,
        env: impl Fn(&str) -> Option<String>,
    ) -> Self {
        let defaults = AudioConfig::default();
        let a = fc.audio;
        let audio = AudioConfig {
            capture_sample_rate: nonzero(
                a.capture_sample_rate,
                defaults.capture_sample_rate,
                "audio.capture_sample_rate",
            ),
            playback_sample_rate: nonzero(
                a.playback_sample_rate,
                defaults.playback_sample_rate,
                "audio.playback_sample_rate",
            ),
            realtime_sample_rate: nonzero(
                a.realtime_sample_rate,
                defaults.realtime_sample_rate,
                "audio.realtime_sample_rate",
            ),
            chunk_size: nonzero(a.chunk_size, defaults.chunk_size, "audio.chunk_size"),
            playback_chunk_size: nonzero(
                a.playback_chunk_size,
                defaults.playback_chunk_size,
                "audio.playback_chunk_size",
            ),
            channels: defaults.channels,
            noise_floor: a.noise_floor.unwrap_or(defaults.noise_floor),
            volume_multiplier: a.volume_multiplier.unwrap_or(defaults.volume_multiplier),
            detection_time: a
                .detection_time_ms
                .map_or(defaults.detection_time, Duration::from_millis),
            record_time_after_detection: a
                .record_time_after_detection_ms
                .map_or(defaults.record_time_after_detection, Duration::from_millis),
            moving_average_window: nonzero(
                a.moving_average_window,
                defaults.moving_average_window,
                "audio.moving_average_window",
            ),
            default_threshold: a.default_threshold.unwrap_or(defaults.default_threshold),
            playback_buffer_chunks: nonzero(
                a.playback_buffer_chunks,
                defaults.playback_buffer_chunks,
                "audio.playback_buffer_chunks",
            ),
            enqueue_timeout: defaults.enqueue_timeout,
            fade_out_samples: a.fade_out_samples.unwrap_or(defaults.fade_out_samples),
            synthesis_workers: nonzero(
                a.synthesis_workers,
                defaults.synthesis_workers,
                "audio.synthesis_workers",
            ),
            sentence_timeout: defaults.sentence_timeout,
        };

        let voice_defaults = VoiceConfig::default();
        let voice = VoiceConfig {
            stt_model: env("JUNIN_STT_MODEL")
                .or(fc.voice.stt_model)
                .unwrap_or(voice_defaults.stt_model),
            tts_model: env("JUNIN_TTS_MODEL")
                .or(fc.voice.tts_model)
                .unwrap_or(voice_defaults.tts_model),
            tts_voice: env("JUNIN_TTS_VOICE")
                .or(fc.voice.tts_voice)
                .unwrap_or(voice_defaults.tts_voice),
            tts_speed: fc.voice.tts_speed.unwrap_or(voice_defaults.tts_speed),
            tts_format: fc.voice.tts_format.unwrap_or(voice_defaults.tts_format),
            language: fc.voice.language,
            speak_replies: fc.voice.speak_replies.unwrap_or(voice_defaults.speak_replies),
            spellcheck: fc.voice.spellcheck.unwrap_or(voice_defaults.spellcheck),
            spelling_terms: fc
                .voice
                .spelling_terms
                .map(PathBuf::from)
                .or_else(default_spelling_terms),
        };

        let chat_defaults = ChatConfig::default();
        let chat = ChatConfig {
            model: env("JUNIN_CHAT_MODEL")
                .or(fc.chat.model)
                .unwrap_or(chat_defaults.model),
            system_prompt: fc.chat.system_prompt.unwrap_or(chat_defaults.system_prompt),
        };

        let realtime = RealtimeConfig {
            url: env("JUNIN_REALTIME_URL")
                .or(fc.realtime.url)
                .unwrap_or_else(|| RealtimeConfig::default().url),
        };

        let api_keys = ApiKeys {
            openai: env("OPENAI_API_KEY").or(fc.api_keys.openai),
        };

        Self {
            audio,
            voice,
            chat,
            realtime,
            api_keys,
            input_device: DeviceSelection::from_name(fc.devices.input),
            output_device: DeviceSelection::from_name(fc.devices.output),
            tasks_dir: env("JUNIN_TASKS_DIR")
                .map(PathBuf::from)
                .or_else(|| fc.tasks_dir.map(PathBuf::from))
                .or_else(default_tasks_dir),
            vad_enabled: fc.vad.unwrap_or(true),
        }
    }

    /// `OpenAI` API key or a configuration error
    ///
    /// # Errors
    ///
    /// Returns error if no key is configured
    pub fn openai_key(&self) -> crate::Result<&str> {
        self.api_keys
            .openai
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| crate::Error::Config("OPENAI_API_KEY is not set".to_string()))
    }
}

/// File value unless it is zero, which falls back to `default`
fn nonzero<T>(value: Option<T>, default: T, key: &str) -> T
where
    T: Copy + Default + PartialEq + std::fmt::Display,
{
    match value {
        Some(v) if v == T::default() => {
            tracing::warn!(key, default = %default, "zero is not allowed here, using default");
            default
        }
        Some(v) => v,
        None => default,
    }
}

/// Default task manifest directory: `~/.config/junin/tasks/`
fn default_tasks_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("junin").join("tasks"))
}

/// Default spelling term list: `~/.config/junin/spelling_terms.txt`
fn default_spelling_terms() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("junin").join("spelling_terms.txt"))
}
