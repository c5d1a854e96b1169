//! Full-duplex session with the realtime API
//!
//! One async task owns the socket. Microphone frames arrive from a capture
//! thread over a channel; response audio leaves for a player thread that
//! may block on the playback buffer without stalling the socket.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, mpsc as std_mpsc};
use std::thread::JoinHandle;

use async_tungstenite::tokio::{ConnectStream, connect_async};
use async_tungstenite::tungstenite::client::IntoClientRequest;
use async_tungstenite::tungstenite::http::HeaderValue;
use async_tungstenite::tungstenite::{self, Message};
use async_tungstenite::WebSocketStream;
use futures::{Sink, SinkExt, StreamExt};
use tokio::sync::mpsc;

use super::handler::{DeltaPlayer, Step, handle_event};
use super::protocol::{RealtimeEvent, SessionSettings};
use crate::config::RealtimeConfig;
use crate::events::AssistantEvent;
use crate::voice::{
    AudioChunkProcessor, AudioEncoding, AudioFrame, CaptureEngine, InputOwner,
    PlaybackStreamManager,
};
use crate::{Error, Result};

/// Connection parameters for one realtime conversation
#[derive(Debug, Clone)]
pub struct RealtimeSession {
    url: String,
    api_key: String,
    settings: SessionSettings,
}

impl RealtimeSession {
    /// Create a session description; nothing connects until [`Self::run`]
    ///
    /// # Errors
    ///
    /// Returns error if the API key is empty
    pub fn new(config: &RealtimeConfig, api_key: String, settings: SessionSettings) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config("OpenAI API key required for realtime".to_string()));
        }
        Ok(Self {
            url: config.url.clone(),
            api_key,
            settings,
        })
    }

    async fn connect(&self) -> Result<WebSocketStream<ConnectStream>> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| Error::Realtime(format!("invalid realtime url: {e}")))?;
        let auth = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
            .map_err(|e| Error::Config(format!("invalid API key: {e}")))?;
        let headers = request.headers_mut();
        headers.insert("Authorization", auth);
        headers.insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

        let (socket, response) = connect_async(request)
            .await
            .map_err(|e| Error::Realtime(format!("connect failed: {e}")))?;
        tracing::info!(status = %response.status(), url = %self.url, "realtime socket connected");
        Ok(socket)
    }

    /// Stream the microphone to the server and play its replies until
    /// `shutdown` resolves or the server closes the socket
    ///
    /// `engine` should capture at the realtime sample rate.
    ///
    /// # Errors
    ///
    /// Returns error if the output or input device can't be opened, the
    /// connection fails, or the socket errors mid-session
    pub async fn run<F>(
        &self,
        engine: Arc<CaptureEngine>,
        playback: Arc<PlaybackStreamManager>,
        shutdown: F,
    ) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        playback.ensure_stream()?;
        let socket = self.connect().await?;
        let (mut sink, mut stream) = socket.split();

        send(
            &mut sink,
            &RealtimeEvent::SessionUpdate {
                session: self.settings.clone(),
            },
        )
        .await?;

        let (frame_tx, mut frame_rx) = mpsc::unbounded_channel();
        let mic = MicPump::spawn(&engine, frame_tx)?;
        let player = PlayerThread::spawn(Arc::clone(&playback))?;
        let decoder = AudioChunkProcessor::new(AudioEncoding::Pcm16).without_normalization();

        tokio::pin!(shutdown);
        let result = loop {
            tokio::select! {
                () = &mut shutdown => {
                    tracing::info!("realtime session shutting down");
                    break Ok(());
                }
                frame = frame_rx.recv() => {
                    let Some(frame) = frame else {
                        break Err(Error::Realtime("microphone stream ended".to_string()));
                    };
                    if let Err(e) = send(&mut sink, &RealtimeEvent::append_frame(&frame)).await {
                        break Err(e);
                    }
                }
                message = stream.next() => match message {
                    Some(Ok(Message::Text(text))) => {
                        let event = match RealtimeEvent::parse(&text) {
                            Ok(event) => event,
                            Err(e) => {
                                tracing::warn!(error = %e, "unparseable realtime message");
                                continue;
                            }
                        };
                        match handle_event(event, &playback, &decoder) {
                            Step::Continue => {}
                            Step::Send(reply) => {
                                if let Err(e) = send(&mut sink, &reply).await {
                                    break Err(e);
                                }
                            }
                            step => player.submit(step),
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        tracing::info!(reason = ?frame, "server closed realtime session");
                        break Ok(());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break Err(Error::Realtime(format!("socket error: {e}"))),
                    None => break Ok(()),
                },
            }
        };

        if let Err(e) = sink.close().await {
            tracing::debug!(error = %e, "closing realtime socket");
        }
        let joined = tokio::task::spawn_blocking(move || {
            drop(mic);
            drop(player);
        })
        .await;
        if joined.is_err() {
            tracing::error!("realtime worker thread panicked");
        }
        playback.flush();
        result
    }
}

async fn send<S>(sink: &mut S, event: &RealtimeEvent) -> Result<()>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let text = serde_json::to_string(event)?;
    sink.send(Message::Text(text))
        .await
        .map_err(|e| Error::Realtime(format!("send failed: {e}")))
}

/// Reads the microphone on its own thread while holding the input device
struct MicPump {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl MicPump {
    fn spawn(engine: &CaptureEngine, frames: mpsc::UnboundedSender<AudioFrame>) -> Result<Self> {
        let lease = engine.arbiter().acquire(InputOwner::Realtime)?;
        let mut source = engine.open_source()?;
        let timeout = engine.config().frame_duration();
        let events = engine.events().clone();

        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);

        let handle = std::thread::Builder::new()
            .name("junin-realtime-mic".to_string())
            .spawn(move || {
                tracing::info!(device = source.device_name(), "streaming microphone");
                while !flag.load(Ordering::Acquire) {
                    match source.read_frame(timeout) {
                        Ok(Some(frame)) => {
                            if frames.send(frame).is_err() {
                                break;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            tracing::error!(error = %e, "microphone failed during realtime session");
                            let _ = events.send(AssistantEvent::DeviceFailed {
                                feature: "realtime",
                                message: e.to_string(),
                            });
                            break;
                        }
                    }
                }
                drop(source);
                drop(lease);
            })
            .map_err(Error::Io)?;

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }
}

impl Drop for MicPump {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            tracing::error!("microphone thread panicked");
        }
    }
}

/// Feeds response audio into the playback buffer
struct PlayerThread {
    tx: Option<std_mpsc::Sender<Step>>,
    handle: Option<JoinHandle<()>>,
}

impl PlayerThread {
    fn spawn(playback: Arc<PlaybackStreamManager>) -> Result<Self> {
        let (tx, rx) = std_mpsc::channel::<Step>();
        let handle = std::thread::Builder::new()
            .name("junin-realtime-player".to_string())
            .spawn(move || {
                let mut player =
                    DeltaPlayer::new(Arc::clone(playback.buffer()), playback.enqueue_timeout());
                for step in rx {
                    match step {
                        Step::Play {
                            samples,
                            generation,
                        } => player.feed(&samples, generation),
                        Step::Finish { generation } => player.finish(generation),
                        Step::Continue | Step::Send(_) => {}
                    }
                }
            })
            .map_err(Error::Io)?;

        Ok(Self {
            tx: Some(tx),
            handle: Some(handle),
        })
    }

    fn submit(&self, step: Step) {
        if let Some(tx) = &self.tx
            && tx.send(step).is_err()
        {
            tracing::warn!("realtime player stopped, dropping audio");
        }
    }
}

impl Drop for PlayerThread {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            tracing::error!("realtime player thread panicked");
        }
    }
}
