//! Bounded playback queue shared between producers and the output callback
//!
//! Producers block (with a timeout) when the queue is full; the output
//! callback never waits on producers. It only takes the state lock, which
//! producers hold for a push or a clear, and emits silence on underrun.
//!
//! Every flush bumps a generation counter. Producers tag pushes with the
//! generation they started in, so a chunk prepared before a flush can never
//! land after it.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Outcome of [`PlaybackBuffer::push`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueue {
    /// Chunk queued for playback
    Queued,
    /// Queue stayed full for the whole timeout; chunk dropped
    TimedOut,
    /// Buffer was flushed since the producer started; chunk dropped
    Stale,
}

#[derive(Debug, Default)]
struct BufferState {
    queue: VecDeque<Vec<f32>>,
    /// Chunk being rendered and the read position inside it
    current: Vec<f32>,
    cursor: usize,
    generation: u64,
    underruns: u64,
}

impl BufferState {
    fn clear(&mut self) -> usize {
        let dropped = self.queue.len();
        self.queue.clear();
        self.current.clear();
        self.cursor = 0;
        self.generation = self.generation.wrapping_add(1);
        dropped
    }

    fn next_sample(&mut self) -> Option<f32> {
        if self.cursor >= self.current.len() {
            self.current = self.queue.pop_front()?;
            self.cursor = 0;
        }
        let sample = self.current.get(self.cursor).copied();
        self.cursor += 1;
        sample
    }
}

/// Bounded FIFO of fixed-size sample chunks awaiting output
#[derive(Debug)]
pub struct PlaybackBuffer {
    state: Mutex<BufferState>,
    not_full: Condvar,
    capacity: usize,
    chunk_size: usize,
}

impl PlaybackBuffer {
    /// Create a buffer holding at most `capacity` chunks of `chunk_size` samples
    #[must_use]
    pub fn new(capacity: usize, chunk_size: usize) -> Self {
        Self {
            state: Mutex::new(BufferState::default()),
            not_full: Condvar::new(),
            capacity: capacity.max(1),
            chunk_size: chunk_size.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BufferState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Samples per chunk
    #[must_use]
    pub const fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Max queued chunks
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current flush generation; pass it to [`Self::push`]
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// Queued chunks, excluding the one being rendered
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    /// True when nothing is queued
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().queue.is_empty()
    }

    /// True when nothing is queued and the current chunk has been fully rendered
    #[must_use]
    pub fn is_idle(&self) -> bool {
        let state = self.lock();
        state.queue.is_empty() && state.cursor >= state.current.len()
    }

    /// Number of callbacks that had to emit silence for lack of data
    #[must_use]
    pub fn underruns(&self) -> u64 {
        self.lock().underruns
    }

    /// Queue a chunk, waiting at most `timeout` for space
    pub fn push(&self, chunk: Vec<f32>, generation: u64, timeout: Duration) -> Enqueue {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if state.generation != generation {
                return Enqueue::Stale;
            }
            if state.queue.len() < self.capacity {
                state.queue.push_back(chunk);
                return Enqueue::Queued;
            }
            let now = Instant::now();
            if now >= deadline {
                return Enqueue::TimedOut;
            }
            state = self
                .not_full
                .wait_timeout(state, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|e| e.into_inner().0);
        }
    }

    /// Take the next whole chunk, or a silent chunk of `chunk_size` on underrun
    #[must_use]
    pub fn pull_chunk(&self) -> Vec<f32> {
        let mut state = self.lock();
        if let Some(chunk) = state.queue.pop_front() {
            self.not_full.notify_one();
            chunk
        } else {
            state.underruns += 1;
            vec![0.0; self.chunk_size]
        }
    }

    /// Fill an interleaved output buffer, duplicating each mono sample across
    /// `channels`; frames with no queued data are silent
    pub fn render(&self, out: &mut [f32], channels: usize) {
        let channels = channels.max(1);
        let mut state = self.lock();
        let queued_before = state.queue.len();
        let mut starved = false;

        for frame in out.chunks_mut(channels) {
            let sample = state.next_sample().unwrap_or_else(|| {
                starved = true;
                0.0
            });
            frame.fill(sample);
        }

        if starved {
            state.underruns += 1;
        }
        if state.queue.len() < queued_before {
            self.not_full.notify_all();
        }
    }

    /// Discard everything queued and in flight; returns chunks dropped
    pub fn flush(&self) -> usize {
        let dropped = self.lock().clear();
        self.not_full.notify_all();
        dropped
    }

    /// Cut playback short: keep a faded tail of at most `fade_samples` from
    /// the audio currently playing and discard the rest
    pub fn interrupt(&self, fade_samples: usize) -> usize {
        let mut state = self.lock();
        let mut tail: Vec<f32> = if state.cursor < state.current.len() {
            state.current[state.cursor..].to_vec()
        } else {
            state.queue.front().cloned().unwrap_or_default()
        };
        tail.truncate(fade_samples);
        apply_fade_out(&mut tail);

        let dropped = state.clear();
        state.current = tail;
        state.cursor = 0;
        drop(state);

        self.not_full.notify_all();
        dropped
    }
}

/// Linear ramp from full gain to silence across `samples`
#[allow(clippy::cast_precision_loss)]
pub fn apply_fade_out(samples: &mut [f32]) {
    let n = samples.len();
    if n == 0 {
        return;
    }
    if n == 1 {
        samples[0] = 0.0;
        return;
    }
    let last = (n - 1) as f32;
    for (i, sample) in samples.iter_mut().enumerate() {
        *sample *= 1.0 - i as f32 / last;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_underrun_emits_silence_of_requested_length() {
        let buffer = PlaybackBuffer::new(4, 8);
        let chunk = buffer.pull_chunk();
        assert_eq!(chunk, vec![0.0; 8]);

        let mut out = vec![1.0f32; 32];
        buffer.render(&mut out, 2);
        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(buffer.underruns(), 2);
    }

    #[test]
    fn test_render_spans_chunks_and_duplicates_channels() {
        let buffer = PlaybackBuffer::new(4, 2);
        let g = buffer.generation();
        assert_eq!(buffer.push(vec![0.1, 0.2], g, Duration::ZERO), Enqueue::Queued);
        assert_eq!(buffer.push(vec![0.3, 0.4], g, Duration::ZERO), Enqueue::Queued);

        let mut out = vec![0.0f32; 6];
        buffer.render(&mut out, 2);
        assert_eq!(out, vec![0.1, 0.1, 0.2, 0.2, 0.3, 0.3]);

        let mut out = vec![9.0f32; 2];
        buffer.render(&mut out, 1);
        assert_eq!(out, vec![0.4, 0.0]);
        assert!(buffer.is_idle());
    }

    #[test]
    fn test_push_times_out_when_full() {
        let buffer = PlaybackBuffer::new(1, 2);
        let g = buffer.generation();
        assert_eq!(buffer.push(vec![0.0; 2], g, Duration::ZERO), Enqueue::Queued);
        assert_eq!(
            buffer.push(vec![0.0; 2], g, Duration::from_millis(20)),
            Enqueue::TimedOut
        );
    }

    #[test]
    fn test_push_after_flush_is_stale() {
        let buffer = PlaybackBuffer::new(4, 2);
        let g = buffer.generation();
        buffer.push(vec![0.5; 2], g, Duration::ZERO);
        assert_eq!(buffer.flush(), 1);
        assert_eq!(buffer.push(vec![0.5; 2], g, Duration::ZERO), Enqueue::Stale);
        assert!(buffer.is_idle());
    }

    #[test]
    fn test_flush_wakes_blocked_producer() {
        let buffer = Arc::new(PlaybackBuffer::new(1, 2));
        let g = buffer.generation();
        buffer.push(vec![0.0; 2], g, Duration::ZERO);

        let producer = {
            let buffer = Arc::clone(&buffer);
            std::thread::spawn(move || buffer.push(vec![0.0; 2], g, Duration::from_secs(5)))
        };
        std::thread::sleep(Duration::from_millis(20));
        buffer.flush();
        assert_eq!(producer.join().unwrap(), Enqueue::Stale);
    }

    #[test]
    fn test_interrupt_keeps_short_faded_tail() {
        let buffer = PlaybackBuffer::new(4, 8);
        let g = buffer.generation();
        buffer.push(vec![1.0; 8], g, Duration::ZERO);
        buffer.push(vec![1.0; 8], g, Duration::ZERO);

        let mut out = vec![0.0f32; 2];
        buffer.render(&mut out, 1);

        assert_eq!(buffer.interrupt(4), 1);
        let mut out = vec![9.0f32; 8];
        buffer.render(&mut out, 1);
        assert!((out[0] - 1.0).abs() < f32::EPSILON);
        assert!(out[1] < out[0]);
        assert!(out[3].abs() < f32::EPSILON);
        assert!(out[4..].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_fade_out_ramp() {
        let mut samples = vec![1.0f32; 5];
        apply_fade_out(&mut samples);
        assert_eq!(samples, vec![1.0, 0.75, 0.5, 0.25, 0.0]);
    }
}
