//! Text-to-speech (TTS) processing
//!
//! Synthesis is blocking: sentences are synthesized on worker threads
//! alongside realtime playback, outside any async runtime.

use std::sync::OnceLock;

use crate::config::VoiceConfig;
use crate::{Error, Result};

const SPEECH_URL: &str = "https://api.openai.com/v1/audio/speech";

/// Turns one sentence of text into encoded audio
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize `text`, returning the encoded audio payload
    ///
    /// # Errors
    ///
    /// Returns error if synthesis fails
    fn synthesize(&self, text: &str) -> Result<Vec<u8>>;
}

/// Synthesizes speech with the `OpenAI` speech API
pub struct OpenAiSpeech {
    client: OnceLock<reqwest::blocking::Client>,
    api_key: String,
    model: String,
    voice: String,
    speed: f32,
    format: String,
}

impl OpenAiSpeech {
    /// Create a synthesizer from the voice settings
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(api_key: String, voice: &VoiceConfig) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config("OpenAI API key required for TTS".to_string()));
        }

        Ok(Self {
            client: OnceLock::new(),
            api_key,
            model: voice.tts_model.clone(),
            voice: voice.tts_voice.clone(),
            speed: voice.tts_speed,
            format: voice.tts_format.clone(),
        })
    }

    /// Response format requested from the API
    #[must_use]
    pub fn format(&self) -> &str {
        &self.format
    }

    // Built on first use so it is created on a worker thread
    fn client(&self) -> &reqwest::blocking::Client {
        self.client.get_or_init(reqwest::blocking::Client::new)
    }
}

impl SpeechSynthesizer for OpenAiSpeech {
    fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct TtsRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            speed: f32,
            response_format: &'a str,
        }

        let request = TtsRequest {
            model: &self.model,
            input: text,
            voice: &self.voice,
            speed: self.speed,
            response_format: &self.format,
        };

        let response = self
            .client()
            .post(SPEECH_URL)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            return Err(Error::Tts(format!("OpenAI TTS error {status}: {body}")));
        }

        let audio = response.bytes()?;
        Ok(audio.to_vec())
    }
}
