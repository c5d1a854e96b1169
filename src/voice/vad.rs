//! Voice activity detection
//!
//! [`VoiceActivityDetector`] is a pure state machine over per-frame volumes
//! and audio-clock timestamps. [`run_vad_loop`] drives it from an input
//! source and opens or closes segments on a [`SegmentRecorder`].
//! [`VadHandle`] runs that loop on its own thread holding the input lease.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use super::calibrate::NoiseCalibrator;
use super::capture::{CaptureEngine, InputOwner, SegmentRecorder};
use super::device::InputSource;
use super::frame::AudioFrame;
use crate::config::AudioConfig;
use crate::events::{AssistantEvent, EventSender};
use crate::{Error, Result};

/// Detector state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadState {
    /// No sound above threshold
    Idle,
    /// Above threshold, not yet long enough to count as speech
    Rising,
    /// Confirmed speech, segment open
    Active,
    /// Below threshold inside the grace period
    Trailing,
}

/// State change reported by [`VoiceActivityDetector::process`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadTransition {
    /// Idle to rising
    Rising,
    /// Rising back to idle before the detection time
    Aborted,
    /// Speech confirmed; open a segment
    Activated,
    /// Active to trailing
    Trailing,
    /// Trailing back to active; the segment stays open
    Resumed,
    /// Grace period expired; close the segment
    Closed,
}

/// Threshold and timing hysteresis over frame volumes
#[derive(Debug, Clone)]
pub struct VoiceActivityDetector {
    threshold: f32,
    detection_time: Duration,
    grace: Duration,
    frame_duration: Duration,
    state: VadState,
    rise_started: Duration,
    last_above: Duration,
}

impl VoiceActivityDetector {
    /// Create a detector using `threshold` and the timing from `config`
    #[must_use]
    pub fn new(threshold: f32, config: &AudioConfig) -> Self {
        Self {
            threshold,
            detection_time: config.detection_time,
            grace: config.record_time_after_detection,
            frame_duration: config.frame_duration(),
            state: VadState::Idle,
            rise_started: Duration::ZERO,
            last_above: Duration::ZERO,
        }
    }

    #[must_use]
    pub const fn state(&self) -> VadState {
        self.state
    }

    #[must_use]
    pub const fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Duration of one frame on the audio clock
    #[must_use]
    pub const fn frame_duration(&self) -> Duration {
        self.frame_duration
    }

    /// Return to idle, dropping any pending timers
    pub fn reset(&mut self) {
        self.state = VadState::Idle;
        self.rise_started = Duration::ZERO;
        self.last_above = Duration::ZERO;
    }

    /// Feed one frame's volume; `at` is the frame's start on the audio clock
    ///
    /// A volume equal to the threshold does not count as exceeding it.
    pub fn process(&mut self, volume: f32, at: Duration) -> Option<VadTransition> {
        let frame_end = at + self.frame_duration;
        let above = volume > self.threshold;

        match (self.state, above) {
            (VadState::Idle, false) => None,
            (VadState::Idle, true) => {
                self.rise_started = at;
                self.state = VadState::Rising;
                Some(self.confirm(frame_end).unwrap_or(VadTransition::Rising))
            }
            (VadState::Rising, true) => self.confirm(frame_end),
            (VadState::Rising, false) => {
                self.reset();
                Some(VadTransition::Aborted)
            }
            (VadState::Active, true) => {
                self.last_above = frame_end;
                None
            }
            (VadState::Active, false) => {
                self.state = VadState::Trailing;
                Some(self.expire(frame_end).unwrap_or(VadTransition::Trailing))
            }
            (VadState::Trailing, true) => {
                self.state = VadState::Active;
                self.last_above = frame_end;
                Some(VadTransition::Resumed)
            }
            (VadState::Trailing, false) => self.expire(frame_end),
        }
    }

    fn confirm(&mut self, frame_end: Duration) -> Option<VadTransition> {
        if frame_end.saturating_sub(self.rise_started) >= self.detection_time {
            self.state = VadState::Active;
            self.last_above = frame_end;
            Some(VadTransition::Activated)
        } else {
            None
        }
    }

    fn expire(&mut self, frame_end: Duration) -> Option<VadTransition> {
        if frame_end.saturating_sub(self.last_above) > self.grace {
            self.reset();
            Some(VadTransition::Closed)
        } else {
            None
        }
    }
}

/// Drive `detector` from `source` until `stop` is set or a read fails
///
/// Frames seen while rising are held back and seed the segment once speech
/// is confirmed. Any segment still open when the loop ends is closed.
///
/// # Errors
///
/// Returns the device error that aborted the loop
pub fn run_vad_loop(
    source: &mut dyn InputSource,
    detector: &mut VoiceActivityDetector,
    recorder: &dyn SegmentRecorder,
    stop: &AtomicBool,
    noise_floor: f32,
    events: Option<&EventSender>,
) -> Result<()> {
    let frame_duration = detector.frame_duration();
    let mut preroll: Vec<AudioFrame> = Vec::new();
    let mut clock = Duration::ZERO;

    let result = loop {
        if stop.load(Ordering::Acquire) {
            break Ok(());
        }

        let frame = match source.read_frame(frame_duration) {
            Ok(Some(frame)) => frame,
            Ok(None) => continue,
            Err(e) => break Err(e),
        };

        let at = clock;
        clock += frame_duration;

        match detector.process(frame.volume(noise_floor), at) {
            Some(VadTransition::Rising) => {
                preroll.clear();
                preroll.push(frame);
            }
            Some(VadTransition::Aborted) => preroll.clear(),
            Some(VadTransition::Activated) => {
                preroll.push(frame);
                if let Err(e) = recorder.start(std::mem::take(&mut preroll)) {
                    tracing::error!(error = %e, "could not open speech segment");
                    detector.reset();
                    continue;
                }
                if let Some(events) = events {
                    let _ = events.send(AssistantEvent::SpeechDetected);
                }
            }
            Some(VadTransition::Closed) => {
                recorder.stop();
            }
            Some(VadTransition::Trailing | VadTransition::Resumed) | None => {
                match detector.state() {
                    VadState::Active | VadState::Trailing => recorder.append(frame),
                    VadState::Rising => preroll.push(frame),
                    VadState::Idle => {}
                }
            }
        }
    };

    if matches!(detector.state(), VadState::Active | VadState::Trailing) {
        recorder.stop();
    }
    detector.reset();
    result
}

/// Voice detection running on a background thread
pub struct VadHandle {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl VadHandle {
    /// Claim the input device and start listening for speech
    ///
    /// The device is opened before this returns, so open failures surface
    /// to the caller. When `calibrate` is set, the first window of frames
    /// calibrates the threshold; otherwise the configured default is used.
    /// [`Self::stop`] interrupts calibration too.
    ///
    /// # Errors
    ///
    /// Returns `Error::InputBusy` during a manual recording, or a device
    /// error if the input can't be opened
    pub fn spawn(engine: Arc<CaptureEngine>, calibrate: bool) -> Result<Self> {
        let lease = engine.arbiter().acquire(InputOwner::Vad)?;
        let mut source = engine.open_source()?;

        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let config = engine.config().clone();

        let handle = std::thread::Builder::new()
            .name("junin-vad".to_string())
            .spawn(move || {
                let calibrator = NoiseCalibrator::from_config(&config);
                let threshold = if calibrate {
                    calibrator.calibrate_or_default(source.as_mut(), &flag)
                } else {
                    calibrator.default_threshold()
                };
                let mut detector = VoiceActivityDetector::new(threshold, &config);
                tracing::info!(threshold, device = source.device_name(), "voice detection enabled");

                let events = engine.events().clone();
                if let Err(e) = run_vad_loop(
                    source.as_mut(),
                    &mut detector,
                    engine.as_ref(),
                    &flag,
                    config.noise_floor,
                    Some(&events),
                ) {
                    tracing::error!(error = %e, "voice detection stopped after device error");
                    let _ = events.send(AssistantEvent::DeviceFailed {
                        feature: "voice detection",
                        message: e.to_string(),
                    });
                }

                drop(source);
                drop(lease);
                tracing::info!("voice detection disabled");
            })
            .map_err(Error::Io)?;

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// True until the loop has exited
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Signal the loop and wait for it to release the device
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            tracing::error!("voice detection thread panicked");
        }
    }
}

impl Drop for VadHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME: Duration = Duration::from_millis(10);

    fn detector() -> VoiceActivityDetector {
        // 160 samples at 16 kHz is 10 ms
        let config = AudioConfig {
            chunk_size: 160,
            detection_time: Duration::from_millis(50),
            record_time_after_detection: Duration::from_millis(30),
            ..AudioConfig::default()
        };
        VoiceActivityDetector::new(100.0, &config)
    }

    fn feed(d: &mut VoiceActivityDetector, volumes: &[f32]) -> Vec<Option<VadTransition>> {
        volumes
            .iter()
            .enumerate()
            .map(|(i, &v)| d.process(v, FRAME * u32::try_from(i).unwrap()))
            .collect()
    }

    #[test]
    fn test_short_spike_aborts() {
        let mut d = detector();
        let out = feed(&mut d, &[150.0, 150.0, 150.0, 150.0, 0.0]);
        assert_eq!(out[0], Some(VadTransition::Rising));
        assert!(out[1..4].iter().all(Option::is_none));
        assert_eq!(out[4], Some(VadTransition::Aborted));
        assert_eq!(d.state(), VadState::Idle);
    }

    #[test]
    fn test_activates_once_detection_time_reached() {
        let mut d = detector();
        let out = feed(&mut d, &[150.0; 5]);
        assert_eq!(out[3], None);
        assert_eq!(out[4], Some(VadTransition::Activated));
        assert_eq!(d.state(), VadState::Active);
    }

    #[test]
    fn test_volume_equal_to_threshold_is_silence() {
        let mut d = detector();
        assert_eq!(d.process(100.0, Duration::ZERO), None);
        assert_eq!(d.state(), VadState::Idle);
    }

    #[test]
    fn test_grace_period_and_resume() {
        let mut d = detector();
        let mut volumes = vec![150.0; 5];
        volumes.extend([0.0, 0.0, 150.0, 0.0, 0.0, 0.0, 0.0]);
        let out = feed(&mut d, &volumes);

        assert_eq!(out[4], Some(VadTransition::Activated));
        assert_eq!(out[5], Some(VadTransition::Trailing));
        assert_eq!(out[6], None);
        assert_eq!(out[7], Some(VadTransition::Resumed));
        assert_eq!(out[8], Some(VadTransition::Trailing));
        // 30 ms of silence is not yet more than the grace period
        assert_eq!(out[10], None);
        assert_eq!(out[11], Some(VadTransition::Closed));
        assert_eq!(d.state(), VadState::Idle);
    }

    #[test]
    fn test_instant_activation_when_detection_time_within_one_frame() {
        let config = AudioConfig {
            chunk_size: 160,
            detection_time: Duration::from_millis(5),
            ..AudioConfig::default()
        };
        let mut d = VoiceActivityDetector::new(100.0, &config);
        assert_eq!(d.process(500.0, Duration::ZERO), Some(VadTransition::Activated));
    }
}
