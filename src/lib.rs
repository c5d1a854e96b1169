//! Junin - desktop voice assistant
//!
//! This library provides the duplex audio pipeline and the assistant built
//! on top of it:
//! - Microphone capture with adaptive voice activity detection
//! - Streaming text-to-speech with interruptible playback
//! - Language model replies dispatched to task handlers
//! - A realtime path streaming audio both ways over a WebSocket
//!
//! # Architecture
//!
//! ```text
//! mic ─► CaptureEngine ─► VAD ─► RecordingSession ─► WAV
//!                                                     │
//!                               Transcriber ◄─────────┘
//!                                    │
//!                  LanguageModel ─► TaskRegistry ─► reply text
//!                                                     │
//!        SpeechOrchestrator ◄─────────────────────────┘
//!              │ per-sentence synthesis (worker pool)
//!              ▼
//!        AudioChunkProcessor ─► PlaybackBuffer ─► output stream ─► speakers
//! ```

pub mod assistant;
pub mod chat;
pub mod config;
pub mod error;
pub mod events;
pub mod realtime;
pub mod speech;
pub mod tasks;
pub mod voice;

pub use assistant::{Assistant, AudioContext};
pub use config::Config;
pub use error::{Error, Result};
pub use events::{AssistantEvent, EventReceiver, EventSender};
pub use speech::SpeechOrchestrator;
pub use tasks::{TaskHandler, TaskRegistry};
