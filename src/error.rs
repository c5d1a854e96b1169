//! Error types for junin

use thiserror::Error;

/// Result type alias for junin operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the assistant
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio processing error
    #[error("audio error: {0}")]
    Audio(String),

    /// Audio device could not be opened, read, or written
    #[error("device error: {0}")]
    Device(String),

    /// The input device is already held by another recorder
    #[error("input device busy: held by {0}")]
    InputBusy(&'static str),

    /// Audio payload could not be decoded
    #[error("decode error: {0}")]
    Decode(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Language model error
    #[error("chat error: {0}")]
    Chat(String),

    /// Language model returned a response we can't interpret
    #[error("unrecognized response shape: {0}")]
    ResponseShape(String),

    /// Task handler error
    #[error("task error: {0}")]
    Task(String),

    /// Realtime session error
    #[error("realtime error: {0}")]
    Realtime(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}
