//! Reacting to realtime server events
//!
//! [`handle_event`] does no I/O of its own: it decodes audio, interrupts
//! playback, and tells the session what to send or play next.
//! [`DeltaPlayer`] re-chunks streamed audio for the playback buffer.

use std::sync::Arc;
use std::time::Duration;

use super::protocol::RealtimeEvent;
use crate::voice::playback::pad_chunk;
use crate::voice::{AudioChunkProcessor, Enqueue, PlaybackBuffer, PlaybackStreamManager};

/// What the session should do after an event
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Nothing to do
    Continue,
    /// Send this event to the server
    Send(RealtimeEvent),
    /// Queue decoded response audio tagged with the buffer generation it
    /// arrived in
    Play { samples: Vec<f32>, generation: u64 },
    /// The response's audio is complete
    Finish { generation: u64 },
}

/// Handle one server event
#[must_use]
pub fn handle_event(
    event: RealtimeEvent,
    playback: &PlaybackStreamManager,
    decoder: &AudioChunkProcessor,
) -> Step {
    match event {
        RealtimeEvent::SessionCreated => {
            tracing::info!("realtime session created");
            Step::Continue
        }
        RealtimeEvent::AudioDelta { delta } => {
            let samples = decoder.decode_base64(&delta);
            if samples.is_empty() {
                return Step::Continue;
            }
            Step::Play {
                samples,
                generation: playback.buffer().generation(),
            }
        }
        RealtimeEvent::AudioDone => Step::Finish {
            generation: playback.buffer().generation(),
        },
        RealtimeEvent::SpeechStarted => {
            let dropped = playback.interrupt();
            tracing::info!(dropped, "user started speaking, cancelling response");
            Step::Send(RealtimeEvent::CancelResponse)
        }
        RealtimeEvent::SpeechStopped => {
            tracing::debug!("user stopped speaking");
            Step::Continue
        }
        RealtimeEvent::Error { error } => {
            if error.is_empty_buffer() {
                tracing::debug!(message = %error.message, "ignoring empty input buffer error");
            } else {
                tracing::warn!(
                    code = error.code.as_deref().unwrap_or("unknown"),
                    message = %error.message,
                    "realtime server error"
                );
            }
            Step::Continue
        }
        RealtimeEvent::Unknown => Step::Continue,
        RealtimeEvent::AppendAudio { .. }
        | RealtimeEvent::SessionUpdate { .. }
        | RealtimeEvent::CancelResponse => {
            tracing::debug!("ignoring client event echoed by server");
            Step::Continue
        }
    }
}

/// Collects streamed samples into whole chunks and queues them
///
/// Deltas rarely line up with the chunk size, so the remainder is carried
/// to the next delta. A flush since the samples arrived discards them.
pub struct DeltaPlayer {
    buffer: Arc<PlaybackBuffer>,
    timeout: Duration,
    pending: Vec<f32>,
    generation: u64,
}

impl DeltaPlayer {
    #[must_use]
    pub fn new(buffer: Arc<PlaybackBuffer>, timeout: Duration) -> Self {
        let generation = buffer.generation();
        Self {
            buffer,
            timeout,
            pending: Vec::new(),
            generation,
        }
    }

    /// Samples waiting for a full chunk
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    fn retarget(&mut self, generation: u64) -> bool {
        if generation != self.generation {
            self.pending.clear();
            self.generation = generation;
        }
        generation == self.buffer.generation()
    }

    /// Queue every whole chunk `samples` completes
    pub fn feed(&mut self, samples: &[f32], generation: u64) {
        if !self.retarget(generation) {
            return;
        }
        self.pending.extend_from_slice(samples);

        let chunk_size = self.buffer.chunk_size();
        let whole = self.pending.len() / chunk_size * chunk_size;
        if whole == 0 {
            return;
        }
        let rest = self.pending.split_off(whole);
        let ready = std::mem::replace(&mut self.pending, rest);
        for chunk in ready.chunks(chunk_size) {
            if !self.push(chunk.to_vec()) {
                self.pending.clear();
                return;
            }
        }
    }

    /// Queue the remainder, faded and padded
    pub fn finish(&mut self, generation: u64) {
        if !self.retarget(generation) || self.pending.is_empty() {
            return;
        }
        let tail = std::mem::take(&mut self.pending);
        self.push(pad_chunk(&tail, self.buffer.chunk_size()));
    }

    fn push(&self, chunk: Vec<f32>) -> bool {
        match self.buffer.push(chunk, self.generation, self.timeout) {
            Enqueue::Queued => true,
            Enqueue::TimedOut => {
                tracing::warn!("playback buffer full, dropping realtime audio");
                true
            }
            Enqueue::Stale => false,
        }
    }
}
