//! Assistant event bus
//!
//! Audio threads publish on an unbounded tokio channel, which never blocks
//! the sender; the assistant loop consumes events in order.

use tokio::sync::mpsc;

use crate::voice::RecordedAudio;

/// Where a recording came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingOrigin {
    Manual,
    Vad,
}

/// Something the assistant loop should react to
#[derive(Debug, Clone)]
pub enum AssistantEvent {
    /// Voice detection confirmed the user started speaking
    SpeechDetected,
    /// A recording was finalized
    RecordingFinished {
        audio: RecordedAudio,
        origin: RecordingOrigin,
    },
    /// A recording was transcribed
    Transcribed(String),
    /// Final reply text for the user
    Reply(String),
    /// First audio of a reply reached the output stream
    SpeechStarted,
    /// A reply finished playing or was interrupted
    SpeechFinished { interrupted: bool },
    /// Turn spoken replies on or off; muted replies are only logged
    SetSpeech { enabled: bool },
    /// An audio device failed and the feature stopped
    DeviceFailed {
        feature: &'static str,
        message: String,
    },
}

pub type EventSender = mpsc::UnboundedSender<AssistantEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<AssistantEvent>;

/// Create a connected sender and receiver
#[must_use]
pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}
