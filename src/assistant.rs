//! Assistant wiring and event loop
//!
//! [`AudioContext`] is built once at startup and shared by `Arc`; it owns
//! the single output stream, the capture engine, and the speech
//! orchestrator. [`Assistant`] turns finished recordings into spoken
//! replies: transcribe, ask the model, dispatch the task, speak.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::chat::{Conversation, LanguageModel};
use crate::config::Config;
use crate::events::{AssistantEvent, EventReceiver, EventSender, RecordingOrigin};
use crate::speech::SpeechOrchestrator;
use crate::tasks::TaskRegistry;
use crate::voice::{
    AudioChunkProcessor, AudioEncoding, CaptureEngine, InputArbiter, InputBackend,
    OutputBackend, PlaybackStreamManager, RecordedAudio, SpeechSynthesizer, Transcriber,
    VadHandle,
};
use crate::{Error, Result};

/// Shared audio components
pub struct AudioContext {
    arbiter: Arc<InputArbiter>,
    capture: Arc<CaptureEngine>,
    playback: Arc<PlaybackStreamManager>,
    speech: Arc<SpeechOrchestrator>,
}

impl AudioContext {
    /// Build the audio components; no device opens until first use
    ///
    /// # Errors
    ///
    /// Returns error if the synthesis workers can't be started
    pub fn new(
        config: &Config,
        input: Arc<dyn InputBackend>,
        output: Arc<dyn OutputBackend>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        events: EventSender,
    ) -> Result<Self> {
        let arbiter = InputArbiter::new();
        let capture = Arc::new(CaptureEngine::new(
            input,
            Arc::clone(&arbiter),
            config.audio.clone(),
            config.input_device.clone(),
            events.clone(),
        ));
        let playback = Arc::new(PlaybackStreamManager::new(
            output,
            &config.audio,
            config.output_device.clone(),
        ));
        let decoder = AudioChunkProcessor::new(AudioEncoding::from_format(&config.voice.tts_format));
        let speech = Arc::new(
            SpeechOrchestrator::new(Arc::clone(&playback), synthesizer, decoder, &config.audio)?
                .with_events(events),
        );

        Ok(Self {
            arbiter,
            capture,
            playback,
            speech,
        })
    }

    #[must_use]
    pub const fn arbiter(&self) -> &Arc<InputArbiter> {
        &self.arbiter
    }

    #[must_use]
    pub const fn capture(&self) -> &Arc<CaptureEngine> {
        &self.capture
    }

    #[must_use]
    pub const fn playback(&self) -> &Arc<PlaybackStreamManager> {
        &self.playback
    }

    #[must_use]
    pub const fn speech(&self) -> &Arc<SpeechOrchestrator> {
        &self.speech
    }

    /// Start voice detection on the shared capture engine
    ///
    /// # Errors
    ///
    /// Returns error if a manual recording holds the input or the device
    /// can't be opened
    pub fn start_vad(&self, calibrate: bool) -> Result<VadHandle> {
        VadHandle::spawn(Arc::clone(&self.capture), calibrate)
    }

    /// Stop speech and recording and close the output stream
    pub fn shutdown(&self) {
        self.speech.stop();
        if self.arbiter.is_recording()
            && let Some(audio) = self.capture.stop_recording()
        {
            tracing::debug!(frames = audio.frames, "discarded manual recording at shutdown");
        }
        self.playback.cleanup();
    }
}

/// Speaks replies one after another on a dedicated thread
///
/// Each reply carries the speech epoch from when it was queued, so a stop
/// drops replies still waiting in the channel.
struct Speaker {
    speech: Arc<SpeechOrchestrator>,
    closing: Arc<AtomicBool>,
    tx: Option<std_mpsc::Sender<(u64, String)>>,
    handle: Option<JoinHandle<()>>,
}

impl Speaker {
    fn spawn(speech: Arc<SpeechOrchestrator>) -> Result<Self> {
        let (tx, rx) = std_mpsc::channel::<(u64, String)>();
        let closing = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&closing);
        let orchestrator = Arc::clone(&speech);
        let handle = std::thread::Builder::new()
            .name("junin-speech".to_string())
            .spawn(move || {
                for (epoch, text) in rx {
                    if flag.load(Ordering::Acquire) {
                        break;
                    }
                    if let Err(e) = orchestrator.speak_if_current(epoch, &text, || {}) {
                        tracing::warn!(error = %e, "could not speak reply");
                    }
                }
            })
            .map_err(Error::Io)?;

        Ok(Self {
            speech,
            closing,
            tx: Some(tx),
            handle: Some(handle),
        })
    }

    fn say(&self, text: String) {
        let epoch = self.speech.epoch();
        if let Some(tx) = &self.tx
            && tx.send((epoch, text)).is_err()
        {
            tracing::error!("speech thread stopped, reply not spoken");
        }
    }
}

impl Drop for Speaker {
    fn drop(&mut self) {
        self.closing.store(true, Ordering::Release);
        self.tx.take();
        self.speech.stop();
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            tracing::error!("speech thread panicked");
        }
    }
}

/// Voice assistant event loop
pub struct Assistant {
    context: Arc<AudioContext>,
    transcriber: Arc<dyn Transcriber>,
    model: Arc<dyn LanguageModel>,
    tasks: TaskRegistry,
    conversation: Conversation,
    events: EventSender,
    speaker: Speaker,
    speak_replies: bool,
}

impl Assistant {
    /// Create an assistant whose system prompt lists the registered tasks
    ///
    /// # Errors
    ///
    /// Returns error if the speech thread can't be started
    pub fn new(
        context: Arc<AudioContext>,
        transcriber: Arc<dyn Transcriber>,
        model: Arc<dyn LanguageModel>,
        tasks: TaskRegistry,
        base_prompt: &str,
        events: EventSender,
    ) -> Result<Self> {
        let conversation = Conversation::new(tasks.system_prompt(base_prompt));
        let speaker = Speaker::spawn(Arc::clone(context.speech()))?;
        Ok(Self {
            context,
            transcriber,
            model,
            tasks,
            conversation,
            events,
            speaker,
            speak_replies: true,
        })
    }

    /// Start with spoken replies on or off
    #[must_use]
    pub const fn with_speech(mut self, enabled: bool) -> Self {
        self.speak_replies = enabled;
        self
    }

    /// Conversation history so far
    #[must_use]
    pub const fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// Consume events until the bus closes or `shutdown` resolves
    pub async fn run<F>(mut self, mut events: EventReceiver, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                () = &mut shutdown => break,
                event = events.recv() => match event {
                    Some(event) => self.handle(event).await,
                    None => break,
                },
            }
        }
        // Joining the speech thread blocks until playback is quiet
        if tokio::task::spawn_blocking(move || drop(self)).await.is_err() {
            tracing::error!("speech shutdown panicked");
        }
        tracing::info!("assistant stopped");
    }

    /// React to one event
    pub async fn handle(&mut self, event: AssistantEvent) {
        match event {
            AssistantEvent::SpeechDetected => self.interrupt_speech().await,
            AssistantEvent::RecordingFinished { audio, origin } => {
                if let Some(reply) = self.process_recording(&audio, origin).await {
                    if self.speak_replies {
                        self.speaker.say(reply);
                    } else {
                        tracing::info!(text = %reply, "reply speech disabled, not speaking");
                    }
                }
            }
            AssistantEvent::SetSpeech { enabled } => self.set_speech(enabled).await,
            AssistantEvent::Transcribed(text) => tracing::info!(text = %text, "heard"),
            AssistantEvent::Reply(text) => tracing::info!(text = %text, "replying"),
            AssistantEvent::SpeechStarted => tracing::debug!("speech started"),
            AssistantEvent::SpeechFinished { interrupted } => {
                tracing::debug!(interrupted, "speech finished");
            }
            AssistantEvent::DeviceFailed { feature, message } => {
                tracing::warn!(feature, message = %message, "audio device failed");
            }
        }
    }

    async fn set_speech(&mut self, enabled: bool) {
        if self.speak_replies == enabled {
            return;
        }
        self.speak_replies = enabled;
        if enabled {
            tracing::info!("reply speech enabled");
        } else {
            tracing::info!("reply speech disabled");
            self.stop_speech().await;
        }
    }

    /// Stop the reply being spoken and drop any still queued
    async fn interrupt_speech(&self) {
        if self.context.speech().is_speaking() {
            tracing::info!("user started speaking, interrupting reply");
        }
        self.stop_speech().await;
    }

    async fn stop_speech(&self) {
        let speech = Arc::clone(self.context.speech());
        if tokio::task::spawn_blocking(move || speech.stop()).await.is_err() {
            tracing::error!("speech stop task panicked");
        }
    }

    /// Transcribe a recording and produce the reply to speak
    ///
    /// Returns `None` when nothing was said or the model couldn't answer.
    pub async fn process_recording(
        &mut self,
        audio: &RecordedAudio,
        origin: RecordingOrigin,
    ) -> Option<String> {
        tracing::debug!(
            ?origin,
            frames = audio.frames,
            duration_ms = audio.duration.as_millis(),
            "recording finished"
        );

        let text = match self.transcriber.transcribe(&audio.wav).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "transcription failed");
                String::new()
            }
        };
        if text.trim().is_empty() {
            tracing::debug!("nothing transcribed, ignoring recording");
            return None;
        }
        let _ = self.events.send(AssistantEvent::Transcribed(text.clone()));

        let reply = self.respond(&text).await?;
        let _ = self.events.send(AssistantEvent::Reply(reply.clone()));
        Some(reply)
    }

    /// Ask the model about `text` and run the task it picks
    ///
    /// The exchange is recorded only when the model answered.
    pub async fn respond(&mut self, text: &str) -> Option<String> {
        let response = match self.conversation.ask(self.model.as_ref(), text).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "language model request failed");
                return None;
            }
        };

        let reply = self.tasks.dispatch(&response.kind, &response.content);
        self.conversation.record(text, &reply);
        tracing::debug!(task = %response.kind, chars = reply.len(), "reply ready");
        Some(reply)
    }
}
