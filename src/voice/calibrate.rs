//! Ambient noise calibration
//!
//! Listens to a window of frames with nobody speaking and derives the
//! detection threshold as the mean frame volume times a multiplier.

use std::sync::atomic::{AtomicBool, Ordering};

use super::device::InputSource;
use crate::config::AudioConfig;
use crate::{Error, Result};

/// Consecutive empty reads tolerated per window frame before giving up
const MAX_EMPTY_READS_PER_FRAME: usize = 4;

/// Computes the voice detection threshold from ambient input
#[derive(Debug, Clone, Copy)]
pub struct NoiseCalibrator {
    window: usize,
    noise_floor: f32,
    multiplier: f32,
    default_threshold: f32,
    frame_timeout: std::time::Duration,
}

impl NoiseCalibrator {
    #[must_use]
    pub fn from_config(config: &AudioConfig) -> Self {
        Self {
            window: config.moving_average_window.max(1),
            noise_floor: config.noise_floor,
            multiplier: config.volume_multiplier,
            default_threshold: config.default_threshold,
            frame_timeout: config.frame_duration() * 2,
        }
    }

    /// Threshold used when calibration can't run
    #[must_use]
    pub const fn default_threshold(&self) -> f32 {
        self.default_threshold
    }

    /// Frames sampled per calibration pass
    #[must_use]
    pub const fn window(&self) -> usize {
        self.window
    }

    /// Mean of `volumes` times the multiplier; the default if empty
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn threshold_from_volumes<I>(&self, volumes: I) -> f32
    where
        I: IntoIterator<Item = f32>,
    {
        let (sum, count) = volumes
            .into_iter()
            .fold((0.0f64, 0usize), |(sum, count), v| (sum + f64::from(v), count + 1));
        if count == 0 {
            return self.default_threshold;
        }
        #[allow(clippy::cast_possible_truncation)]
        let mean = (sum / count as f64) as f32;
        mean * self.multiplier
    }

    /// Read one window of frames from `source` and compute the threshold
    ///
    /// `stop` is checked before every read; once set, the default threshold
    /// is returned without finishing the window.
    ///
    /// # Errors
    ///
    /// Returns error if the device fails or stops delivering frames
    pub fn calibrate(&self, source: &mut dyn InputSource, stop: &AtomicBool) -> Result<f32> {
        let mut volumes = Vec::with_capacity(self.window);
        let mut empty_reads = 0;

        while volumes.len() < self.window {
            if stop.load(Ordering::Acquire) {
                tracing::debug!(
                    frames = volumes.len(),
                    window = self.window,
                    "calibration cancelled"
                );
                return Ok(self.default_threshold);
            }
            match source.read_frame(self.frame_timeout)? {
                Some(frame) => {
                    volumes.push(frame.volume(self.noise_floor));
                    empty_reads = 0;
                }
                None => {
                    empty_reads += 1;
                    if empty_reads > MAX_EMPTY_READS_PER_FRAME {
                        return Err(Error::Audio(format!(
                            "input stalled after {} of {} calibration frames",
                            volumes.len(),
                            self.window
                        )));
                    }
                }
            }
        }

        let threshold = self.threshold_from_volumes(volumes);
        tracing::info!(
            threshold,
            device = source.device_name(),
            frames = self.window,
            "noise threshold calibrated"
        );
        Ok(threshold)
    }

    /// Like [`Self::calibrate`], but falls back to the default threshold
    #[must_use]
    pub fn calibrate_or_default(&self, source: &mut dyn InputSource, stop: &AtomicBool) -> f32 {
        self.calibrate(source, stop).unwrap_or_else(|e| {
            tracing::warn!(
                error = %e,
                threshold = self.default_threshold,
                "calibration failed, using default threshold"
            );
            self.default_threshold
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::frame::AudioFrame;
    use std::collections::VecDeque;
    use std::time::Duration;

    struct ScriptedSource {
        frames: VecDeque<Result<Option<AudioFrame>>>,
    }

    impl InputSource for ScriptedSource {
        fn read_frame(&mut self, _timeout: Duration) -> Result<Option<AudioFrame>> {
            self.frames.pop_front().unwrap_or(Ok(None))
        }

        fn device_name(&self) -> &str {
            "scripted"
        }
    }

    fn calibrator(window: usize) -> NoiseCalibrator {
        NoiseCalibrator::from_config(&AudioConfig {
            moving_average_window: window,
            ..AudioConfig::default()
        })
    }

    #[test]
    fn test_threshold_is_mean_times_multiplier() {
        let c = calibrator(4);
        let threshold = c.threshold_from_volumes([100.0, 200.0, 300.0, 400.0]);
        assert!((threshold - 750.0).abs() < 1e-3);
    }

    #[test]
    fn test_empty_volumes_use_default() {
        let c = calibrator(4);
        assert!((c.threshold_from_volumes(std::iter::empty()) - 200.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_quiet_room_clamps_to_zero() {
        // 4 samples of 10 give an L2 norm of 20, under the noise floor
        let mut source = ScriptedSource {
            frames: (0..3)
                .map(|_| Ok(Some(AudioFrame::new(vec![10; 4]))))
                .collect(),
        };
        let threshold = calibrator(3).calibrate(&mut source, &AtomicBool::new(false)).unwrap();
        assert!(threshold.abs() < f32::EPSILON);
    }

    #[test]
    fn test_reads_exactly_one_window() {
        // norm of [300, 400] is 500
        let mut source = ScriptedSource {
            frames: (0..5)
                .map(|_| Ok(Some(AudioFrame::new(vec![300, 400]))))
                .collect(),
        };
        let threshold = calibrator(2).calibrate(&mut source, &AtomicBool::new(false)).unwrap();
        assert!((threshold - 1500.0).abs() < 1e-3);
        assert_eq!(source.frames.len(), 3);
    }

    #[test]
    fn test_device_error_falls_back_to_default() {
        let mut source = ScriptedSource {
            frames: VecDeque::from([Err(Error::Device("unplugged".to_string()))]),
        };
        let c = calibrator(3);
        let go = AtomicBool::new(false);
        assert!(c.calibrate(&mut source, &go).is_err());

        let mut source = ScriptedSource {
            frames: VecDeque::from([Err(Error::Device("unplugged".to_string()))]),
        };
        assert!((c.calibrate_or_default(&mut source, &go) - 200.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_stalled_input_is_an_error() {
        let mut source = ScriptedSource {
            frames: VecDeque::new(),
        };
        assert!(calibrator(3).calibrate(&mut source, &AtomicBool::new(false)).is_err());
    }

    #[test]
    fn test_stop_ends_calibration_with_default() {
        let mut source = ScriptedSource {
            frames: (0..10)
                .map(|_| Ok(Some(AudioFrame::new(vec![300, 400]))))
                .collect(),
        };
        let threshold = calibrator(10)
            .calibrate(&mut source, &AtomicBool::new(true))
            .unwrap();
        assert!((threshold - 200.0).abs() < f32::EPSILON);
        assert_eq!(source.frames.len(), 10);
    }
}
