//! Decoding synthesized speech into normalized float PCM

use std::io::Cursor;

use base64::Engine as _;

use crate::{Error, Result};

/// Encoding of a synthesized speech payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioEncoding {
    /// MPEG layer III (TTS default)
    Mp3,
    /// Raw little-endian signed 16-bit mono PCM
    Pcm16,
}

impl AudioEncoding {
    /// Encoding for a TTS `response_format` name
    #[must_use]
    pub fn from_format(format: &str) -> Self {
        match format {
            "pcm" | "pcm16" => Self::Pcm16,
            _ => Self::Mp3,
        }
    }
}

/// Turns encoded speech into peak-normalized samples
#[derive(Debug, Clone, Copy)]
pub struct AudioChunkProcessor {
    encoding: AudioEncoding,
    normalize: bool,
}

impl AudioChunkProcessor {
    /// Create a processor for payloads in `encoding`
    #[must_use]
    pub const fn new(encoding: AudioEncoding) -> Self {
        Self {
            encoding,
            normalize: true,
        }
    }

    /// Scale to full range instead of normalizing each payload's peak
    ///
    /// Streamed deltas are fragments of one utterance; normalizing each one
    /// separately would change the gain from delta to delta.
    #[must_use]
    pub const fn without_normalization(mut self) -> Self {
        self.normalize = false;
        self
    }

    /// Payload encoding
    #[must_use]
    pub const fn encoding(&self) -> AudioEncoding {
        self.encoding
    }

    /// Decode and normalize a whole payload
    ///
    /// Malformed or truncated payloads yield an empty vector.
    #[must_use]
    pub fn decode(&self, payload: &[u8]) -> Vec<f32> {
        let decoded = match self.encoding {
            AudioEncoding::Mp3 => decode_mp3(payload),
            AudioEncoding::Pcm16 => Ok(decode_pcm16(payload)),
        };

        match decoded {
            Ok(mut samples) => {
                if self.normalize {
                    normalize_peak(&mut samples);
                } else {
                    let scale = f32::from(i16::MAX) + 1.0;
                    samples.iter_mut().for_each(|s| *s /= scale);
                }
                samples
            }
            Err(e) => {
                tracing::warn!(error = %e, bytes = payload.len(), "discarding undecodable audio");
                Vec::new()
            }
        }
    }

    /// Decode a base64 payload, tolerating missing padding
    #[must_use]
    pub fn decode_base64(&self, payload: &str) -> Vec<f32> {
        match decode_base64_lenient(payload) {
            Ok(bytes) => self.decode(&bytes),
            Err(e) => {
                tracing::warn!(error = %e, "discarding malformed base64 audio");
                Vec::new()
            }
        }
    }
}

/// Decode base64 whether or not trailing `=` padding is present
///
/// # Errors
///
/// Returns error if the payload is not valid base64
pub fn decode_base64_lenient(payload: &str) -> Result<Vec<u8>> {
    let trimmed = payload.trim().trim_end_matches('=');
    base64::engine::general_purpose::STANDARD_NO_PAD
        .decode(trimmed)
        .map_err(|e| Error::Decode(format!("base64: {e}")))
}

/// Scale samples so the loudest one has magnitude 1.0
///
/// The peak is taken over the whole payload so consecutive chunks keep the
/// same gain.
pub fn normalize_peak(samples: &mut [f32]) {
    let peak = samples.iter().fold(0.0f32, |m, s| m.max(s.abs()));
    if peak > 0.0 {
        for s in samples.iter_mut() {
            *s /= peak;
        }
    }
}

/// Decode MP3 bytes to mono f32 samples
fn decode_mp3(mp3_data: &[u8]) -> Result<Vec<f32>> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                if frame.channels == 2 {
                    // Stereo: average channels
                    samples.extend(frame.data.chunks(2).map(|pair| {
                        let left = f32::from(pair[0]);
                        let right = f32::from(pair.get(1).copied().unwrap_or(pair[0]));
                        f32::midpoint(left, right)
                    }));
                } else {
                    samples.extend(frame.data.iter().map(|&s| f32::from(s)));
                }
            }
            Err(minimp3::Error::Eof) => break,
            Err(minimp3::Error::SkippedData) => {}
            Err(e) => return Err(Error::Decode(format!("MP3 decode error: {e}"))),
        }
    }

    if samples.is_empty() && !mp3_data.is_empty() {
        return Err(Error::Decode("no MP3 frames found".to_string()));
    }

    Ok(samples)
}

/// Decode little-endian PCM16 bytes; a trailing odd byte is ignored
fn decode_pcm16(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|b| f32::from(i16::from_le_bytes([b[0], b[1]])))
        .collect()
}
