//! Realtime API wire events

use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::voice::AudioFrame;

/// Message exchanged with the realtime endpoint, tagged by `type`
///
/// Server event types this client doesn't handle deserialize as
/// [`RealtimeEvent::Unknown`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RealtimeEvent {
    /// Client: microphone audio, base64 PCM16
    #[serde(rename = "input_audio_buffer.append")]
    AppendAudio { audio: String },

    /// Client: configure the session
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionSettings },

    /// Client: abandon the response in progress
    #[serde(rename = "response.cancel")]
    CancelResponse,

    #[serde(rename = "session.created")]
    SessionCreated,

    /// Server: a piece of response audio, base64 PCM16
    #[serde(rename = "response.audio.delta")]
    AudioDelta { delta: String },

    #[serde(rename = "response.audio.done")]
    AudioDone,

    /// Server: the user started talking
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted,

    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped,

    #[serde(rename = "error")]
    Error { error: ErrorDetail },

    #[serde(other)]
    Unknown,
}

impl RealtimeEvent {
    /// Append event carrying `frame` as base64 little-endian PCM16
    #[must_use]
    pub fn append_frame(frame: &AudioFrame) -> Self {
        Self::AppendAudio {
            audio: base64::engine::general_purpose::STANDARD.encode(frame.to_le_bytes()),
        }
    }

    /// Parse a text message from the server
    ///
    /// # Errors
    ///
    /// Returns error if the message isn't a JSON object with a `type`
    pub fn parse(text: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Session parameters sent in `session.update`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSettings {
    pub modalities: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    pub input_audio_format: String,
    pub output_audio_format: String,
    pub turn_detection: TurnDetection,
}

impl SessionSettings {
    /// PCM16 both ways with server-side voice detection
    #[must_use]
    pub fn pcm16(instructions: Option<String>, voice: Option<String>) -> Self {
        Self {
            modalities: vec!["audio".to_string(), "text".to_string()],
            instructions,
            voice,
            input_audio_format: "pcm16".to_string(),
            output_audio_format: "pcm16".to_string(),
            turn_detection: TurnDetection {
                kind: "server_vad".to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnDetection {
    #[serde(rename = "type")]
    pub kind: String,
}

/// Body of a server `error` event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: String,
}

impl ErrorDetail {
    /// Committing an empty input buffer; happens routinely with server VAD
    #[must_use]
    pub fn is_empty_buffer(&self) -> bool {
        self.code.as_deref() == Some("input_audio_buffer_commit_empty")
            || self.message.contains("buffer is empty")
            || self.message.contains("buffer too small")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_events_serialize_with_type() {
        let cancel = serde_json::to_value(RealtimeEvent::CancelResponse).unwrap();
        assert_eq!(cancel, serde_json::json!({"type": "response.cancel"}));

        let frame = AudioFrame::new(vec![1, -1]);
        let append = serde_json::to_value(RealtimeEvent::append_frame(&frame)).unwrap();
        assert_eq!(append["type"], "input_audio_buffer.append");
        assert_eq!(append["audio"], "AQD//w==");
    }

    #[test]
    fn test_server_events_parse() {
        let delta = RealtimeEvent::parse(
            r#"{"type": "response.audio.delta", "event_id": "e1", "response_id": "r", "delta": "AAA="}"#,
        )
        .unwrap();
        assert_eq!(
            delta,
            RealtimeEvent::AudioDelta {
                delta: "AAA=".to_string()
            }
        );

        let created =
            RealtimeEvent::parse(r#"{"type": "session.created", "session": {"id": "s"}}"#).unwrap();
        assert_eq!(created, RealtimeEvent::SessionCreated);

        let started = RealtimeEvent::parse(
            r#"{"type": "input_audio_buffer.speech_started", "audio_start_ms": 120}"#,
        )
        .unwrap();
        assert_eq!(started, RealtimeEvent::SpeechStarted);
    }

    #[test]
    fn test_unknown_server_type_is_ignored() {
        let event =
            RealtimeEvent::parse(r#"{"type": "response.text.delta", "delta": "oi"}"#).unwrap();
        assert_eq!(event, RealtimeEvent::Unknown);
        assert!(RealtimeEvent::parse("not json").is_err());
    }

    #[test]
    fn test_empty_buffer_error_detected() {
        let RealtimeEvent::Error { error } = RealtimeEvent::parse(
            r#"{"type": "error", "error": {"type": "invalid_request_error", "code": "input_audio_buffer_commit_empty", "message": "Error committing input audio buffer: buffer is empty."}}"#,
        )
        .unwrap() else {
            panic!("expected error event");
        };
        assert!(error.is_empty_buffer());

        let other = ErrorDetail {
            code: None,
            message: "rate limited".to_string(),
        };
        assert!(!other.is_empty_buffer());
    }
}
