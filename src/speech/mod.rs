//! Reply speech: sentence splitting, parallel synthesis, ordered playback

mod orchestrator;
mod pool;
mod sentences;

pub use orchestrator::{SpeakReport, SpeechOrchestrator};
pub use pool::SynthesisPool;
pub use sentences::split_sentences;
