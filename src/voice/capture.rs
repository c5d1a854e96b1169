//! Audio capture from microphone
//!
//! [`CaptureEngine`] owns the recording session slot. It records either
//! manually (its own capture thread reading the device until stopped) or as
//! a [`SegmentRecorder`] fed frame-by-frame by the voice activity detector.
//! [`InputArbiter`] guarantees only one of those holds the input device.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

use super::calibrate::NoiseCalibrator;
use super::device::{
    CaptureSpec, DeviceSelection, InputBackend, InputSource, open_input_with_fallback,
};
use super::frame::AudioFrame;
use super::session::{RecordedAudio, RecordingSession};
use crate::config::AudioConfig;
use crate::events::{AssistantEvent, EventSender, RecordingOrigin};
use crate::{Error, Result};

/// Who currently holds the input device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputOwner {
    /// Push-to-talk recording
    Manual,
    /// Voice activity detection loop
    Vad,
    /// Ambient noise calibration
    Calibration,
    /// Live microphone stream to the realtime API
    Realtime,
}

impl InputOwner {
    /// Name used in logs and errors
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual recording",
            Self::Vad => "voice detection",
            Self::Calibration => "calibration",
            Self::Realtime => "realtime session",
        }
    }
}

/// Grants exclusive use of the input device
#[derive(Debug, Default)]
pub struct InputArbiter {
    owner: Mutex<Option<InputOwner>>,
}

impl InputArbiter {
    /// Create an arbiter with no owner
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn slot(&self) -> MutexGuard<'_, Option<InputOwner>> {
        self.owner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Claim the input device for `owner`
    ///
    /// # Errors
    ///
    /// Returns `Error::InputBusy` if another owner holds it
    pub fn acquire(self: &Arc<Self>, owner: InputOwner) -> Result<InputLease> {
        let mut slot = self.slot();
        if let Some(current) = *slot {
            return Err(Error::InputBusy(current.as_str()));
        }
        *slot = Some(owner);
        drop(slot);
        tracing::debug!(owner = owner.as_str(), "input device acquired");
        Ok(InputLease {
            arbiter: Arc::clone(self),
            owner,
        })
    }

    /// Current owner, if any
    #[must_use]
    pub fn owner(&self) -> Option<InputOwner> {
        *self.slot()
    }

    /// True while a manual recording holds the device
    #[must_use]
    pub fn is_recording(&self) -> bool {
        self.owner() == Some(InputOwner::Manual)
    }

    /// True while voice detection holds the device
    #[must_use]
    pub fn is_recording_vad(&self) -> bool {
        self.owner() == Some(InputOwner::Vad)
    }
}

/// Exclusive claim on the input device, released on drop
#[derive(Debug)]
pub struct InputLease {
    arbiter: Arc<InputArbiter>,
    owner: InputOwner,
}

impl InputLease {
    /// Holder of this lease
    #[must_use]
    pub const fn owner(&self) -> InputOwner {
        self.owner
    }
}

impl Drop for InputLease {
    fn drop(&mut self) {
        let mut slot = self.arbiter.slot();
        if *slot == Some(self.owner) {
            *slot = None;
        }
        drop(slot);
        tracing::debug!(owner = self.owner.as_str(), "input device released");
    }
}

/// Receives speech segments from the voice activity detector
pub trait SegmentRecorder: Send + Sync {
    /// Open a recording seeded with the frames that confirmed speech
    ///
    /// # Errors
    ///
    /// Returns error if a recording is already active
    fn start(&self, preroll: Vec<AudioFrame>) -> Result<()>;

    /// Append a frame to the open recording; ignored when none is open
    fn append(&self, frame: AudioFrame);

    /// Close and finalize the open recording; no-op when none is open
    fn stop(&self) -> Option<RecordedAudio>;
}

struct ManualCapture {
    recording: Arc<AtomicBool>,
    handle: JoinHandle<()>,
    lease: InputLease,
}

/// Captures audio into recording sessions
pub struct CaptureEngine {
    backend: Arc<dyn InputBackend>,
    arbiter: Arc<InputArbiter>,
    config: AudioConfig,
    device: Mutex<DeviceSelection>,
    session: Arc<Mutex<Option<RecordingSession>>>,
    manual: Mutex<Option<ManualCapture>>,
    events: EventSender,
}

impl CaptureEngine {
    /// Create a capture engine; no device is opened until recording starts
    #[must_use]
    pub fn new(
        backend: Arc<dyn InputBackend>,
        arbiter: Arc<InputArbiter>,
        config: AudioConfig,
        device: DeviceSelection,
        events: EventSender,
    ) -> Self {
        Self {
            backend,
            arbiter,
            config,
            device: Mutex::new(device),
            session: Arc::new(Mutex::new(None)),
            manual: Mutex::new(None),
            events,
        }
    }

    /// Input arbiter shared with the voice detector
    #[must_use]
    pub fn arbiter(&self) -> &Arc<InputArbiter> {
        &self.arbiter
    }

    /// Audio tunables this engine records with
    #[must_use]
    pub const fn config(&self) -> &AudioConfig {
        &self.config
    }

    /// Event bus recordings are published on
    #[must_use]
    pub const fn events(&self) -> &EventSender {
        &self.events
    }

    /// Capture format derived from the configuration
    #[must_use]
    pub const fn spec(&self) -> CaptureSpec {
        CaptureSpec {
            sample_rate: self.config.capture_sample_rate,
            chunk_size: self.config.chunk_size,
            channels: self.config.channels,
        }
    }

    /// Currently selected input device
    #[must_use]
    pub fn device(&self) -> DeviceSelection {
        lock(&self.device).clone()
    }

    /// Select the input device by display name
    ///
    /// Takes effect the next time the device is opened.
    ///
    /// # Errors
    ///
    /// Returns error if no input device has that name
    pub fn set_input_device(&self, name: &str) -> Result<()> {
        let devices = self.backend.input_devices()?;
        if !devices.iter().any(|d| d == name) {
            return Err(Error::Device(format!("input device not found: {name}")));
        }
        tracing::info!(device = name, "input device selected");
        *lock(&self.device) = DeviceSelection::Named(name.to_string());
        Ok(())
    }

    /// Open the selected input device, falling back to the default
    ///
    /// # Errors
    ///
    /// Returns error if no input device can be opened
    pub fn open_source(&self) -> Result<Box<dyn InputSource>> {
        open_input_with_fallback(self.backend.as_ref(), &self.device(), &self.spec())
    }

    /// Measure ambient noise and return a detection threshold
    ///
    /// Never fails: if the device is busy or can't be opened, the configured
    /// default threshold is returned.
    #[must_use]
    pub fn calibrate(&self) -> f32 {
        let calibrator = NoiseCalibrator::from_config(&self.config);
        let _lease = match self.arbiter.acquire(InputOwner::Calibration) {
            Ok(lease) => lease,
            Err(e) => {
                tracing::warn!(error = %e, "calibration skipped");
                return calibrator.default_threshold();
            }
        };
        match self.open_source() {
            Ok(mut source) => calibrator.calibrate_or_default(source.as_mut(), &AtomicBool::new(false)),
            Err(e) => {
                tracing::warn!(error = %e, "calibration device unavailable, using default threshold");
                calibrator.default_threshold()
            }
        }
    }

    /// Start a manual recording on a dedicated capture thread
    ///
    /// No-op if a manual recording is already running.
    ///
    /// # Errors
    ///
    /// Returns `Error::InputBusy` while voice detection holds the device, or
    /// a device error if the input can't be opened
    pub fn start_recording(&self) -> Result<()> {
        let mut manual = lock(&self.manual);
        if manual.is_some() {
            return Ok(());
        }

        let lease = self.arbiter.acquire(InputOwner::Manual)?;
        let mut source = self.open_source()?;
        self.open_session(Vec::new())?;

        let recording = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&recording);
        let session = Arc::clone(&self.session);
        let events = self.events.clone();
        let timeout = self.config.frame_duration();

        tracing::info!(device = source.device_name(), "recording started");

        let handle = std::thread::Builder::new()
            .name("junin-capture".to_string())
            .spawn(move || {
                while flag.load(Ordering::Acquire) {
                    match source.read_frame(timeout) {
                        Ok(Some(frame)) => {
                            if let Some(s) = lock(&session).as_mut() {
                                s.append(frame);
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            tracing::error!(error = %e, "capture read failed");
                            let _ = events.send(AssistantEvent::DeviceFailed {
                                feature: "recording",
                                message: e.to_string(),
                            });
                            break;
                        }
                    }
                }
                drop(source);
                tracing::debug!("capture thread exited");
            })
            .map_err(Error::Io)?;

        *manual = Some(ManualCapture {
            recording,
            handle,
            lease,
        });
        Ok(())
    }

    /// Stop the manual recording, join the capture thread, and finalize
    ///
    /// Calling this when not recording is a no-op returning `None`.
    pub fn stop_recording(&self) -> Option<RecordedAudio> {
        let capture = lock(&self.manual).take()?;
        capture.recording.store(false, Ordering::Release);
        if capture.handle.join().is_err() {
            tracing::error!("capture thread panicked");
        }
        let recorded = self.finish_session(RecordingOrigin::Manual);
        drop(capture.lease);
        tracing::info!("recording stopped");
        recorded
    }

    fn open_session(&self, preroll: Vec<AudioFrame>) -> Result<()> {
        let mut slot = lock(&self.session);
        if slot.is_some() {
            return Err(Error::Audio(
                "a recording session is already active".to_string(),
            ));
        }
        let mut session = RecordingSession::new(self.config.capture_sample_rate, self.config.channels);
        for frame in preroll {
            session.append(frame);
        }
        *slot = Some(session);
        Ok(())
    }

    fn finish_session(&self, origin: RecordingOrigin) -> Option<RecordedAudio> {
        let session = lock(&self.session).take()?;
        match session.finalize() {
            Ok(Some(recorded)) => {
                tracing::info!(
                    frames = recorded.frames,
                    duration_ms = recorded.duration.as_millis(),
                    "recording finalized"
                );
                let _ = self.events.send(AssistantEvent::RecordingFinished {
                    audio: recorded.clone(),
                    origin,
                });
                Some(recorded)
            }
            Ok(None) => {
                tracing::debug!("recording captured no frames");
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to finalize recording");
                None
            }
        }
    }
}

impl SegmentRecorder for CaptureEngine {
    fn start(&self, preroll: Vec<AudioFrame>) -> Result<()> {
        if self.arbiter.is_recording() {
            return Err(Error::InputBusy(InputOwner::Manual.as_str()));
        }
        self.open_session(preroll)?;
        tracing::info!("speech detected, recording");
        Ok(())
    }

    fn append(&self, frame: AudioFrame) {
        if let Some(session) = lock(&self.session).as_mut() {
            session.append(frame);
        }
    }

    fn stop(&self) -> Option<RecordedAudio> {
        self.finish_session(RecordingOrigin::Vad)
    }
}

impl Drop for CaptureEngine {
    fn drop(&mut self) {
        if let Some(capture) = lock(&self.manual).take() {
            capture.recording.store(false, Ordering::Release);
            let _ = capture.handle.join();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}
