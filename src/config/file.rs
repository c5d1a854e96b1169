//! TOML configuration file loading
//!
//! Supports `~/.config/junin/config.toml` as a persistent config source.
//! All fields are optional — the file is a partial overlay on top of defaults.

use std::path::PathBuf;

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct JuninConfigFile {
    /// Audio pipeline tunables
    #[serde(default)]
    pub audio: AudioFileConfig,

    /// Voice/TTS/STT configuration
    #[serde(default)]
    pub voice: VoiceFileConfig,

    /// Language model configuration
    #[serde(default)]
    pub chat: ChatFileConfig,

    /// Realtime duplex configuration
    #[serde(default)]
    pub realtime: RealtimeFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,

    /// Selected audio devices, by display name
    #[serde(default)]
    pub devices: DevicesFileConfig,

    /// Task manifest directory
    pub tasks_dir: Option<String>,

    /// Arm voice activity detection on start
    pub vad: Option<bool>,
}

/// Audio tunables; durations are given in milliseconds
#[derive(Debug, Default, Deserialize)]
pub struct AudioFileConfig {
    pub capture_sample_rate: Option<u32>,
    pub playback_sample_rate: Option<u32>,
    pub realtime_sample_rate: Option<u32>,
    pub chunk_size: Option<usize>,
    pub playback_chunk_size: Option<usize>,
    pub noise_floor: Option<f32>,
    pub volume_multiplier: Option<f32>,
    pub detection_time_ms: Option<u64>,
    pub record_time_after_detection_ms: Option<u64>,
    pub moving_average_window: Option<usize>,
    pub default_threshold: Option<f32>,
    pub playback_buffer_chunks: Option<usize>,
    pub fade_out_samples: Option<usize>,
    pub synthesis_workers: Option<usize>,
}

/// Voice processing configuration
#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    /// STT model (e.g. "whisper-1")
    pub stt_model: Option<String>,

    /// TTS model (e.g. "tts-1")
    pub tts_model: Option<String>,

    /// TTS voice identifier (e.g. "onyx")
    pub tts_voice: Option<String>,

    /// TTS speed multiplier
    pub tts_speed: Option<f32>,

    /// TTS response format ("mp3" or "pcm")
    pub tts_format: Option<String>,

    /// Transcription language hint (e.g. "pt")
    pub language: Option<String>,

    /// Speak replies aloud
    pub speak_replies: Option<bool>,

    /// Correct transcripts against a term list
    pub spellcheck: Option<bool>,

    /// Path of the term list, one term per line
    pub spelling_terms: Option<String>,
}

/// Language model configuration
#[derive(Debug, Default, Deserialize)]
pub struct ChatFileConfig {
    /// Model identifier
    pub model: Option<String>,

    /// Base system prompt
    pub system_prompt: Option<String>,
}

/// Realtime duplex configuration
#[derive(Debug, Default, Deserialize)]
pub struct RealtimeFileConfig {
    /// WebSocket endpoint
    pub url: Option<String>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub openai: Option<String>,
}

/// Device selection by display name
#[derive(Debug, Default, Deserialize)]
pub struct DevicesFileConfig {
    pub input: Option<String>,
    pub output: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `JuninConfigFile::default()` if the file doesn't exist or can't be parsed.
#[must_use]
pub fn load_config_file() -> JuninConfigFile {
    let Some(path) = config_file_path() else {
        return JuninConfigFile::default();
    };

    if !path.exists() {
        return JuninConfigFile::default();
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                JuninConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            JuninConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/junin/config.toml`
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("junin").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_is_default() {
        let fc: JuninConfigFile = toml::from_str("").unwrap();
        assert!(fc.voice.tts_voice.is_none());
        assert!(fc.audio.chunk_size.is_none());
        assert!(fc.vad.is_none());
    }

    #[test]
    fn test_partial_audio_section() {
        let fc: JuninConfigFile = toml::from_str(
            r"
vad = false

[audio]
chunk_size = 512
record_time_after_detection_ms = 1500
",
        )
        .unwrap();
        assert_eq!(fc.audio.chunk_size, Some(512));
        assert_eq!(fc.audio.record_time_after_detection_ms, Some(1500));
        assert_eq!(fc.vad, Some(false));
    }
}
