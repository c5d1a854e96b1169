//! Audio playback to speakers
//!
//! [`PlaybackStreamManager`] owns the one output stream the process plays
//! through. Producers feed decoded samples into its [`PlaybackBuffer`]; the
//! stream's realtime callback drains it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::buffer::{Enqueue, PlaybackBuffer, apply_fade_out};
use super::device::{DeviceSelection, OutputBackend, OutputStream, PlaybackSpec};
use crate::config::AudioConfig;
use crate::{Error, Result};

/// How often [`PlaybackStreamManager::drain`] checks the buffer
const DRAIN_POLL: Duration = Duration::from_millis(10);

struct StreamState {
    stream: Option<Box<dyn OutputStream>>,
    device: DeviceSelection,
    fell_back: bool,
}

/// Result of feeding samples with [`PlaybackStreamManager::play_chunks`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlayStats {
    /// Chunks accepted by the buffer
    pub queued: usize,
    /// Chunks dropped after the enqueue timeout
    pub dropped: usize,
    /// Feeding ended early on a stop request or flush
    pub interrupted: bool,
}

/// Owns the output stream and the buffer it renders from
pub struct PlaybackStreamManager {
    backend: Arc<dyn OutputBackend>,
    buffer: Arc<PlaybackBuffer>,
    spec: PlaybackSpec,
    enqueue_timeout: Duration,
    fade_out_samples: usize,
    state: Mutex<StreamState>,
}

impl PlaybackStreamManager {
    /// Create a manager for `device`; the stream opens lazily
    #[must_use]
    pub fn new(backend: Arc<dyn OutputBackend>, config: &AudioConfig, device: DeviceSelection) -> Self {
        Self {
            backend,
            buffer: Arc::new(PlaybackBuffer::new(
                config.playback_buffer_chunks,
                config.playback_chunk_size,
            )),
            spec: PlaybackSpec {
                sample_rate: config.playback_sample_rate,
                channels: config.channels,
            },
            enqueue_timeout: config.enqueue_timeout,
            fade_out_samples: config.fade_out_samples,
            state: Mutex::new(StreamState {
                stream: None,
                device,
                fell_back: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StreamState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Buffer the output callback drains
    #[must_use]
    pub const fn buffer(&self) -> &Arc<PlaybackBuffer> {
        &self.buffer
    }

    /// Output sample rate
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.spec.sample_rate
    }

    /// Longest a producer waits for space before dropping a chunk
    #[must_use]
    pub const fn enqueue_timeout(&self) -> Duration {
        self.enqueue_timeout
    }

    /// Selected output device
    #[must_use]
    pub fn device(&self) -> DeviceSelection {
        self.lock().device.clone()
    }

    /// True if the last open used the system default instead of the selection
    #[must_use]
    pub fn fell_back(&self) -> bool {
        self.lock().fell_back
    }

    /// True while a live stream is open
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.lock().stream.as_ref().is_some_and(|s| s.is_alive())
    }

    /// Open the output stream if it is closed or has died
    ///
    /// Falls back to the system default device when the selected one fails.
    ///
    /// # Errors
    ///
    /// Returns error if no output device can be opened; no stream is left
    /// open in that case
    pub fn ensure_stream(&self) -> Result<()> {
        let mut state = self.lock();
        if state.stream.as_ref().is_some_and(|s| s.is_alive()) {
            return Ok(());
        }
        if state.stream.take().is_some() {
            tracing::warn!(device = state.device.label(), "output stream died, reopening");
        }

        let device = state.device.clone();
        let (stream, fell_back) = self.open_with_fallback(&device)?;
        tracing::info!(
            device = stream.device_name(),
            sample_rate = self.spec.sample_rate,
            fell_back,
            "output stream opened"
        );
        state.stream = Some(stream);
        state.fell_back = fell_back;
        Ok(())
    }

    fn open_with_fallback(&self, device: &DeviceSelection) -> Result<(Box<dyn OutputStream>, bool)> {
        match self
            .backend
            .open_output(device, &self.spec, Arc::clone(&self.buffer))
        {
            Ok(stream) => Ok((stream, false)),
            Err(e) if *device != DeviceSelection::Default => {
                tracing::warn!(
                    device = device.label(),
                    error = %e,
                    "failed to open output device, trying system default"
                );
                let stream = self.backend.open_output(
                    &DeviceSelection::Default,
                    &self.spec,
                    Arc::clone(&self.buffer),
                )?;
                Ok((stream, true))
            }
            Err(e) => Err(e),
        }
    }

    /// Switch playback to another output device
    ///
    /// `None` selects the system default. Queued audio is discarded. On
    /// failure the previous device is restored and the error returned.
    ///
    /// # Errors
    ///
    /// Returns error if the device is unknown or can't be opened
    pub fn update_output_device(&self, name: Option<&str>) -> Result<()> {
        let selection = DeviceSelection::from_name(name.map(str::to_string));
        if let DeviceSelection::Named(wanted) = &selection {
            let devices = self.backend.output_devices()?;
            if !devices.iter().any(|d| d == wanted) {
                return Err(Error::Device(format!("output device not found: {wanted}")));
            }
        }

        let mut state = self.lock();
        let previous = state.device.clone();
        let was_open = state.stream.take().is_some();
        self.buffer.flush();

        match self
            .backend
            .open_output(&selection, &self.spec, Arc::clone(&self.buffer))
        {
            Ok(stream) => {
                tracing::info!(device = stream.device_name(), "output device switched");
                state.stream = Some(stream);
                state.device = selection;
                state.fell_back = false;
                Ok(())
            }
            Err(e) => {
                tracing::warn!(
                    device = selection.label(),
                    previous = previous.label(),
                    error = %e,
                    "output device switch failed, restoring previous device"
                );
                if was_open {
                    match self.open_with_fallback(&previous) {
                        Ok((stream, fell_back)) => {
                            state.stream = Some(stream);
                            state.fell_back = fell_back;
                        }
                        Err(restore) => {
                            tracing::error!(error = %restore, "could not restore previous output device");
                        }
                    }
                }
                state.device = previous;
                Err(e)
            }
        }
    }

    /// Feed samples into the buffer in fixed-size chunks
    ///
    /// # Errors
    ///
    /// Returns error if the output stream can't be opened
    pub fn play_chunks(&self, samples: &[f32], stop: &AtomicBool) -> Result<PlayStats> {
        self.play_chunks_with(samples, stop, || {})
    }

    /// Feed samples, calling `on_first` right after the first chunk is queued
    ///
    /// Stops enqueueing once `stop` is set or the buffer is flushed. The last
    /// short chunk is faded out and padded with silence. Consecutive calls
    /// play back to back; [`Self::finish`] ends the run.
    ///
    /// # Errors
    ///
    /// Returns error if the output stream can't be opened
    pub fn play_chunks_with<F>(&self, samples: &[f32], stop: &AtomicBool, on_first: F) -> Result<PlayStats>
    where
        F: FnOnce(),
    {
        self.ensure_stream()?;

        let generation = self.buffer.generation();
        let chunk_size = self.buffer.chunk_size();
        let mut on_first = Some(on_first);
        let mut stats = PlayStats::default();

        for chunk in samples.chunks(chunk_size).map(|c| pad_chunk(c, chunk_size)) {
            if stop.load(Ordering::Acquire) {
                stats.interrupted = true;
                break;
            }
            match self.buffer.push(chunk, generation, self.enqueue_timeout) {
                Enqueue::Queued => {
                    stats.queued += 1;
                    if let Some(callback) = on_first.take() {
                        callback();
                    }
                }
                Enqueue::TimedOut => {
                    stats.dropped += 1;
                    tracing::warn!(
                        timeout_ms = self.enqueue_timeout.as_millis(),
                        "playback buffer full, dropping chunk"
                    );
                }
                Enqueue::Stale => {
                    stats.interrupted = true;
                    break;
                }
            }
        }

        Ok(stats)
    }

    /// Queue one silent chunk after the last samples of an utterance
    ///
    /// Keeps the tail from being clipped when the next utterance starts.
    /// Returns false if nothing was queued.
    #[must_use]
    pub fn finish(&self, stop: &AtomicBool) -> bool {
        if stop.load(Ordering::Acquire) {
            return false;
        }
        let chunk_size = self.buffer.chunk_size();
        let generation = self.buffer.generation();
        self.buffer.push(vec![0.0; chunk_size], generation, self.enqueue_timeout) == Enqueue::Queued
    }

    /// Wait until queued audio has been rendered
    ///
    /// Returns false if `stop` was set, the stream died, or `timeout` passed.
    pub fn drain(&self, stop: &AtomicBool, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.buffer.is_idle() {
                return true;
            }
            if stop.load(Ordering::Acquire) || !self.is_open() || Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(DRAIN_POLL);
        }
    }

    /// Cut current audio short with a fade-out and drop everything queued
    pub fn interrupt(&self) -> usize {
        let dropped = self.buffer.interrupt(self.fade_out_samples);
        tracing::debug!(dropped, "playback interrupted");
        dropped
    }

    /// Drop everything queued without a fade
    pub fn flush(&self) -> usize {
        self.buffer.flush()
    }

    /// Close the stream and clear the buffer; safe to call repeatedly
    pub fn cleanup(&self) {
        let stream = self.lock().stream.take();
        self.buffer.flush();
        if let Some(stream) = stream {
            tracing::debug!(device = stream.device_name(), "output stream closed");
        }
    }
}

impl Drop for PlaybackStreamManager {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Pad a short final chunk to `chunk_size`, fading out its tail
pub(crate) fn pad_chunk(chunk: &[f32], chunk_size: usize) -> Vec<f32> {
    let mut out = chunk.to_vec();
    if out.len() < chunk_size {
        let fade = out.len().min(chunk_size / 4);
        let start = out.len() - fade;
        apply_fade_out(&mut out[start..]);
        out.resize(chunk_size, 0.0);
    }
    out
}
