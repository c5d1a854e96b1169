//! Streaming text-to-speech
//!
//! [`SpeechOrchestrator::speak`] synthesizes the first sentence on the
//! calling thread while the rest are synthesized on the worker pool, and
//! feeds decoded audio to playback strictly in sentence order.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::pool::SynthesisPool;
use super::sentences::split_sentences;
use crate::Result;
use crate::config::AudioConfig;
use crate::events::{AssistantEvent, EventSender};
use crate::voice::{AudioChunkProcessor, PlaybackStreamManager, SpeechSynthesizer};

/// How often waits re-check the cancel token
const STOP_POLL: Duration = Duration::from_millis(20);

/// Extra time allowed for queued audio to finish rendering
const DRAIN_SLACK: Duration = Duration::from_secs(2);

/// Decoded audio for one sentence
#[derive(Debug, Clone)]
struct SentenceAudio {
    index: usize,
    samples: Vec<f32>,
}

/// What happened during one [`SpeechOrchestrator::speak`] call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpeakReport {
    /// Sentences the text was split into
    pub sentences: usize,
    /// Sentences whose audio was handed to playback
    pub played: usize,
    /// Sentences skipped after a synthesis failure or timeout
    pub skipped: usize,
    /// Speech was cut short by [`SpeechOrchestrator::stop`]
    pub interrupted: bool,
}

/// Speaking flag, stop counter and the current utterance's cancel token
struct SpeechState {
    speaking: bool,
    epoch: u64,
    cancel: Arc<AtomicBool>,
}

/// Synthesizes and plays replies, one utterance at a time
pub struct SpeechOrchestrator {
    playback: Arc<PlaybackStreamManager>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    decoder: AudioChunkProcessor,
    pool: SynthesisPool,
    sentence_timeout: Duration,
    state: Mutex<SpeechState>,
    quiescent: Condvar,
    speak_lock: Mutex<()>,
    events: Option<EventSender>,
}

impl SpeechOrchestrator {
    /// Create an orchestrator playing through `playback`
    ///
    /// # Errors
    ///
    /// Returns error if the synthesis workers can't be started
    pub fn new(
        playback: Arc<PlaybackStreamManager>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        decoder: AudioChunkProcessor,
        config: &AudioConfig,
    ) -> Result<Self> {
        Ok(Self {
            playback,
            synthesizer,
            decoder,
            pool: SynthesisPool::new(config.synthesis_workers)?,
            sentence_timeout: config.sentence_timeout,
            state: Mutex::new(SpeechState {
                speaking: false,
                epoch: 0,
                cancel: Arc::new(AtomicBool::new(false)),
            }),
            quiescent: Condvar::new(),
            speak_lock: Mutex::new(()),
            events: None,
        })
    }

    /// Publish speech start and finish on `events`
    #[must_use]
    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }

    /// Playback manager this orchestrator feeds
    #[must_use]
    pub const fn playback(&self) -> &Arc<PlaybackStreamManager> {
        &self.playback
    }

    /// True while an utterance is being synthesized or played
    #[must_use]
    pub fn is_speaking(&self) -> bool {
        lock(&self.state).speaking
    }

    /// Number of [`Self::stop`] calls so far
    ///
    /// Capture it when a reply is queued and hand it to
    /// [`Self::speak_if_current`] so a stop in between drops the reply.
    #[must_use]
    pub fn epoch(&self) -> u64 {
        lock(&self.state).epoch
    }

    /// Speak `text`, replacing anything currently being spoken
    ///
    /// # Errors
    ///
    /// Returns error if the output stream can't be opened
    pub fn speak(&self, text: &str) -> Result<SpeakReport> {
        self.speak_with(text, || {})
    }

    /// Speak `text`, calling `on_started` once when its first audio chunk
    /// is handed to the output stream
    ///
    /// Blocks until the audio has played or [`Self::stop`] is called.
    ///
    /// # Errors
    ///
    /// Returns error if the output stream can't be opened
    pub fn speak_with<F>(&self, text: &str, on_started: F) -> Result<SpeakReport>
    where
        F: FnOnce(),
    {
        self.cancel_current();
        let epoch = self.epoch();
        self.speak_if_current(epoch, text, on_started)
    }

    /// Speak `text` unless [`Self::stop`] was called since `epoch` was read
    ///
    /// Waits for any utterance in progress to finish first. A dropped
    /// utterance is reported as interrupted with nothing played.
    ///
    /// # Errors
    ///
    /// Returns error if the output stream can't be opened
    pub fn speak_if_current<F>(&self, epoch: u64, text: &str, on_started: F) -> Result<SpeakReport>
    where
        F: FnOnce(),
    {
        let _turn = lock(&self.speak_lock);

        let sentences = split_sentences(text);
        let mut report = SpeakReport {
            sentences: sentences.len(),
            ..SpeakReport::default()
        };
        let Some(first) = sentences.first() else {
            return Ok(report);
        };
        let Some(guard) = SpeakingGuard::enter(self, epoch) else {
            tracing::debug!(sentences = sentences.len(), "stopped before speaking, dropping reply");
            report.interrupted = true;
            return Ok(report);
        };
        let cancel = Arc::clone(&guard.cancel);

        self.playback.ensure_stream()?;
        let started = Instant::now();
        tracing::info!(sentences = sentences.len(), "speaking");

        let results = self.submit_remaining(&sentences, &cancel);

        let mut on_started = Some(on_started);
        let first_audio = synthesize_sentence(
            self.synthesizer.as_ref(),
            self.decoder,
            first,
            0,
        );
        self.play_sentence(&first_audio, &cancel, &mut on_started, &mut report)?;

        let mut pending: BTreeMap<usize, SentenceAudio> = BTreeMap::new();
        for index in 1..sentences.len() {
            if cancel.load(Ordering::Acquire) {
                break;
            }
            match self.wait_for(index, &cancel, &results, &mut pending) {
                Some(audio) => self.play_sentence(&audio, &cancel, &mut on_started, &mut report)?,
                None if cancel.load(Ordering::Acquire) => break,
                None => {
                    tracing::warn!(
                        sentence = index + 1,
                        timeout_ms = self.sentence_timeout.as_millis(),
                        "sentence synthesis timed out, skipping"
                    );
                    report.skipped += 1;
                }
            }
        }

        if report.played > 0 && self.playback.finish(&cancel) {
            let queued = self.playback.buffer().len();
            let chunk = crate::config::frame_duration(
                self.playback.buffer().chunk_size(),
                self.playback.sample_rate(),
            );
            let budget = chunk * u32::try_from(queued).unwrap_or(u32::MAX) + DRAIN_SLACK;
            self.playback.drain(&cancel, budget);
        }

        report.interrupted = cancel.load(Ordering::Acquire);
        tracing::info!(
            sentences = report.sentences,
            played = report.played,
            skipped = report.skipped,
            interrupted = report.interrupted,
            elapsed_ms = started.elapsed().as_millis(),
            "speech finished"
        );
        if let Some(events) = &self.events {
            let _ = events.send(AssistantEvent::SpeechFinished {
                interrupted: report.interrupted,
            });
        }
        Ok(report)
    }

    /// Stop speaking and wait until playback is quiescent
    ///
    /// Sentences not yet played are abandoned, their queued synthesis jobs
    /// are skipped, and the current audio fades out. Utterances queued with
    /// an earlier [`Self::epoch`] are dropped. Safe to call when nothing is
    /// being spoken.
    pub fn stop(&self) {
        {
            let mut state = lock(&self.state);
            state.epoch = state.epoch.wrapping_add(1);
            state.cancel.store(true, Ordering::Release);
        }
        self.playback.interrupt();
        self.wait_quiescent();
    }

    /// Cut the current utterance short without dropping queued ones
    fn cancel_current(&self) {
        {
            let state = lock(&self.state);
            if !state.speaking {
                return;
            }
            state.cancel.store(true, Ordering::Release);
        }
        self.playback.interrupt();
        self.wait_quiescent();
    }

    fn wait_quiescent(&self) {
        let mut state = lock(&self.state);
        while state.speaking {
            state = self
                .quiescent
                .wait(state)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
    }

    /// Queue sentences after the first on the worker pool
    ///
    /// Jobs still queued when `cancel` is set finish without synthesizing.
    fn submit_remaining(&self, sentences: &[String], cancel: &Arc<AtomicBool>) -> Receiver<SentenceAudio> {
        let (tx, rx) = mpsc::channel();
        for (index, sentence) in sentences.iter().enumerate().skip(1) {
            let tx = tx.clone();
            let synthesizer = Arc::clone(&self.synthesizer);
            let decoder = self.decoder;
            let cancel = Arc::clone(cancel);
            let sentence = sentence.clone();
            self.pool.submit(move || {
                if cancel.load(Ordering::Acquire) {
                    return;
                }
                let audio = synthesize_sentence(synthesizer.as_ref(), decoder, &sentence, index);
                let _ = tx.send(audio);
            });
        }
        rx
    }

    /// Wait for sentence `index`, buffering others that finish first
    fn wait_for(
        &self,
        index: usize,
        cancel: &AtomicBool,
        results: &Receiver<SentenceAudio>,
        pending: &mut BTreeMap<usize, SentenceAudio>,
    ) -> Option<SentenceAudio> {
        let deadline = Instant::now() + self.sentence_timeout;
        loop {
            if let Some(audio) = pending.remove(&index) {
                return Some(audio);
            }
            if cancel.load(Ordering::Acquire) {
                return None;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            match results.recv_timeout(remaining.min(STOP_POLL)) {
                Ok(audio) => {
                    pending.insert(audio.index, audio);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return pending.remove(&index),
            }
        }
    }

    fn play_sentence<F>(
        &self,
        audio: &SentenceAudio,
        cancel: &AtomicBool,
        on_started: &mut Option<F>,
        report: &mut SpeakReport,
    ) -> Result<()>
    where
        F: FnOnce(),
    {
        if audio.samples.is_empty() {
            report.skipped += 1;
            return Ok(());
        }
        if cancel.load(Ordering::Acquire) {
            return Ok(());
        }

        let stats = self.playback.play_chunks_with(&audio.samples, cancel, || {
            if let Some(callback) = on_started.take() {
                if let Some(events) = &self.events {
                    let _ = events.send(AssistantEvent::SpeechStarted);
                }
                callback();
            }
        })?;
        if stats.queued > 0 {
            report.played += 1;
        }
        Ok(())
    }
}

/// Marks the orchestrator as speaking until dropped
struct SpeakingGuard<'a> {
    orchestrator: &'a SpeechOrchestrator,
    cancel: Arc<AtomicBool>,
}

impl<'a> SpeakingGuard<'a> {
    /// Install a fresh cancel token, or `None` if a stop came after `epoch`
    fn enter(orchestrator: &'a SpeechOrchestrator, epoch: u64) -> Option<Self> {
        let mut state = lock(&orchestrator.state);
        if state.epoch != epoch {
            return None;
        }
        let cancel = Arc::new(AtomicBool::new(false));
        state.cancel = Arc::clone(&cancel);
        state.speaking = true;
        Some(Self {
            orchestrator,
            cancel,
        })
    }
}

impl Drop for SpeakingGuard<'_> {
    fn drop(&mut self) {
        lock(&self.orchestrator.state).speaking = false;
        self.orchestrator.quiescent.notify_all();
    }
}

/// Synthesize and decode one sentence; failures yield no samples
fn synthesize_sentence(
    synthesizer: &dyn SpeechSynthesizer,
    decoder: AudioChunkProcessor,
    sentence: &str,
    index: usize,
) -> SentenceAudio {
    let api_start = Instant::now();
    let payload = match synthesizer.synthesize(sentence) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::warn!(sentence = index + 1, error = %e, "sentence synthesis failed, skipping");
            return SentenceAudio {
                index,
                samples: Vec::new(),
            };
        }
    };
    let api_time = api_start.elapsed();

    let decode_start = Instant::now();
    let samples = decoder.decode(&payload);
    tracing::debug!(
        sentence = index + 1,
        chars = sentence.chars().count(),
        samples = samples.len(),
        api_ms = api_time.as_millis(),
        decode_ms = decode_start.elapsed().as_millis(),
        "sentence synthesized"
    );

    SentenceAudio { index, samples }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}
