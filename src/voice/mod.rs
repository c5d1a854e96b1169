//! Voice processing module
//!
//! Handles audio capture, voice activity detection, and playback, plus the
//! speech-to-text and text-to-speech collaborators.

pub mod buffer;
pub mod calibrate;
pub mod capture;
pub mod decode;
pub mod device;
pub mod frame;
pub mod host;
pub mod playback;
pub mod session;
pub mod spellcheck;
pub mod stt;
pub mod tts;
pub mod vad;

pub use buffer::{Enqueue, PlaybackBuffer};
pub use calibrate::NoiseCalibrator;
pub use capture::{CaptureEngine, InputArbiter, InputLease, InputOwner, SegmentRecorder};
pub use decode::{AudioChunkProcessor, AudioEncoding};
pub use device::{
    CaptureSpec, DeviceList, DeviceSelection, InputBackend, InputSource, OutputBackend,
    OutputStream, PlaybackSpec,
};
pub use frame::AudioFrame;
pub use host::{CpalHost, list_devices};
pub use playback::{PlayStats, PlaybackStreamManager};
pub use session::{RecordedAudio, RecordingSession};
pub use spellcheck::{SpellcheckTranscriber, load_terms};
pub use stt::{Transcriber, WhisperTranscriber};
pub use tts::{OpenAiSpeech, SpeechSynthesizer};
pub use vad::{VadHandle, VadState, VadTransition, VoiceActivityDetector, run_vad_loop};
