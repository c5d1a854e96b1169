//! Audio frames and volume measurement

use std::sync::Arc;

/// A fixed-length block of mono signed 16-bit samples
///
/// Frames are immutable once read from a device and cheap to clone, so the
/// same frame can sit in a pre-roll buffer and a recording at once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    samples: Arc<[i16]>,
}

impl AudioFrame {
    /// Wrap captured samples
    #[must_use]
    pub fn new(samples: Vec<i16>) -> Self {
        Self {
            samples: samples.into(),
        }
    }

    /// Build a frame from float samples in [-1.0, 1.0]
    #[must_use]
    pub fn from_f32(samples: &[f32]) -> Self {
        Self::new(samples.iter().copied().map(f32_to_i16).collect())
    }

    /// Raw samples
    #[must_use]
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    /// Number of samples in the frame
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the frame holds no samples
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// L2 norm of the samples, clamped to zero below `noise_floor`
    #[must_use]
    pub fn volume(&self, noise_floor: f32) -> f32 {
        volume_sample(&self.samples, noise_floor)
    }

    /// Little-endian PCM16 bytes
    #[must_use]
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }
}

/// Magnitude of one frame: the L2 norm of its samples, zeroed below the floor
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn volume_sample(samples: &[i16], noise_floor: f32) -> f32 {
    let sum_squares: f64 = samples
        .iter()
        .map(|&s| {
            let s = f64::from(s);
            s * s
        })
        .sum();
    let volume = sum_squares.sqrt() as f32;
    if volume < noise_floor { 0.0 } else { volume }
}

/// Convert an f32 sample in [-1.0, 1.0] to i16
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample * 32767.0).clamp(-32768.0, 32767.0) as i16
}
