//! One utterance's worth of captured frames
//!
//! A session only moves forward: it collects frames while active, is
//! finalized exactly once into a WAV container, and is then handed off.

use std::time::Duration;

use chrono::{DateTime, Utc};

use super::frame::AudioFrame;
use crate::config::frame_duration;
use crate::{Error, Result};

/// A finalized recording, ready for transcription
#[derive(Debug, Clone)]
pub struct RecordedAudio {
    /// WAV container bytes (mono, 16-bit PCM)
    pub wav: Vec<u8>,
    /// Frames captured
    pub frames: usize,
    /// Audio length
    pub duration: Duration,
    /// When the session opened
    pub started_at: DateTime<Utc>,
}

/// Frames buffered for one utterance
#[derive(Debug)]
pub struct RecordingSession {
    frames: Vec<AudioFrame>,
    started_at: DateTime<Utc>,
    sample_rate: u32,
    channels: u16,
}

impl RecordingSession {
    /// Open a session recording at `sample_rate`
    #[must_use]
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            frames: Vec::new(),
            started_at: Utc::now(),
            sample_rate,
            channels,
        }
    }

    /// Append a frame
    pub fn append(&mut self, frame: AudioFrame) {
        self.frames.push(frame);
    }

    /// Frames collected so far
    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// When the session was opened
    #[must_use]
    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Encode the collected frames; consumes the session
    ///
    /// Returns `Ok(None)` if no frames were captured.
    ///
    /// # Errors
    ///
    /// Returns error if WAV encoding fails
    pub fn finalize(self) -> Result<Option<RecordedAudio>> {
        if self.frames.is_empty() {
            return Ok(None);
        }

        let sample_count: usize = self.frames.iter().map(AudioFrame::len).sum();
        let wav = frames_to_wav(&self.frames, self.sample_rate, self.channels)?;

        Ok(Some(RecordedAudio {
            wav,
            frames: self.frames.len(),
            duration: frame_duration(sample_count, self.sample_rate),
            started_at: self.started_at,
        }))
    }
}

/// Write frames into a 16-bit PCM WAV container
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn frames_to_wav(frames: &[AudioFrame], sample_rate: u32, channels: u16) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for frame in frames {
            for &sample in frame.samples() {
                writer
                    .write_sample(sample)
                    .map_err(|e| Error::Audio(e.to_string()))?;
            }
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_empty_session_finalizes_to_none() {
        let session = RecordingSession::new(16_000, 1);
        assert!(session.finalize().unwrap().is_none());
    }

    #[test]
    fn test_wav_header_fields() {
        let mut session = RecordingSession::new(16_000, 1);
        session.append(AudioFrame::new(vec![0, 1000, -1000, 32767]));
        session.append(AudioFrame::new(vec![5, 6, 7, 8]));

        let recorded = session.finalize().unwrap().unwrap();
        assert_eq!(recorded.frames, 2);
        assert_eq!(recorded.duration, Duration::from_micros(500));
        assert_eq!(&recorded.wav[0..4], b"RIFF");
        assert_eq!(&recorded.wav[8..12], b"WAVE");

        let mut reader = hound::WavReader::new(Cursor::new(recorded.wav)).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_rate, 16_000);
        assert_eq!(spec.bits_per_sample, 16);

        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![0, 1000, -1000, 32767, 5, 6, 7, 8]);
    }

    #[test]
    fn test_realtime_rate_written_to_header() {
        let frames = vec![AudioFrame::new(vec![0; 240])];
        let wav = frames_to_wav(&frames, 24_000, 1).unwrap();
        let reader = hound::WavReader::new(Cursor::new(wav)).unwrap();
        assert_eq!(reader.spec().sample_rate, 24_000);
        assert_eq!(reader.duration(), 240);
    }
}
