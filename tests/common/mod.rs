//! Shared test utilities: synthetic audio and fake devices

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use junin::voice::{
    AudioFrame, CaptureSpec, DeviceSelection, InputBackend, InputSource, OutputBackend,
    OutputStream, PlaybackBuffer, PlaybackSpec, SpeechSynthesizer,
};
use junin::{Error, Result};

/// Frames of a sine wave, `frame_len` samples each
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
pub fn sine_frames(frames: usize, frame_len: usize, sample_rate: u32, amplitude: f32) -> Vec<AudioFrame> {
    let frequency = 440.0_f32;
    (0..frames)
        .map(|f| {
            let samples = (0..frame_len)
                .map(|i| {
                    let t = (f * frame_len + i) as f32 / sample_rate as f32;
                    (amplitude * (2.0 * std::f32::consts::PI * frequency * t).sin()) as i16
                })
                .collect();
            AudioFrame::new(samples)
        })
        .collect()
}

/// Silent frames
pub fn silence_frames(frames: usize, frame_len: usize) -> Vec<AudioFrame> {
    (0..frames).map(|_| AudioFrame::new(vec![0; frame_len])).collect()
}

/// Plays back a fixed list of frames, then sets `done`
pub struct ScriptedSource {
    frames: VecDeque<AudioFrame>,
    done: Arc<AtomicBool>,
}

impl ScriptedSource {
    pub fn new(frames: Vec<AudioFrame>, done: Arc<AtomicBool>) -> Self {
        Self {
            frames: frames.into(),
            done,
        }
    }
}

impl InputSource for ScriptedSource {
    fn read_frame(&mut self, _timeout: Duration) -> Result<Option<AudioFrame>> {
        match self.frames.pop_front() {
            Some(frame) => Ok(Some(frame)),
            None => {
                self.done.store(true, Ordering::Release);
                Ok(None)
            }
        }
    }

    fn device_name(&self) -> &str {
        "scripted"
    }
}

/// Endless frames of one volume, one every `pace`
struct SteadySource {
    frame: AudioFrame,
    pace: Duration,
}

impl InputSource for SteadySource {
    fn read_frame(&mut self, _timeout: Duration) -> Result<Option<AudioFrame>> {
        std::thread::sleep(self.pace);
        Ok(Some(self.frame.clone()))
    }

    fn device_name(&self) -> &str {
        "fake microphone"
    }
}

/// Input backend handing out quiet endless sources
pub struct FakeInput {
    opened: AtomicUsize,
    pace: Duration,
}

impl FakeInput {
    /// Frames paced a little so threads can interleave
    pub fn new() -> Arc<Self> {
        Self::paced(Duration::from_millis(1))
    }

    /// Frames delivered at the pace of a real device
    pub fn paced(pace: Duration) -> Arc<Self> {
        Arc::new(Self {
            opened: AtomicUsize::new(0),
            pace,
        })
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::Acquire)
    }
}

impl InputBackend for FakeInput {
    fn input_devices(&self) -> Result<Vec<String>> {
        Ok(vec!["fake microphone".to_string()])
    }

    fn open_input(
        &self,
        _device: &DeviceSelection,
        spec: &CaptureSpec,
    ) -> Result<Box<dyn InputSource>> {
        self.opened.fetch_add(1, Ordering::AcqRel);
        Ok(Box::new(SteadySource {
            frame: AudioFrame::new(vec![0; spec.chunk_size]),
            pace: self.pace,
        }))
    }
}

struct FakeStream;

impl OutputStream for FakeStream {
    fn is_alive(&self) -> bool {
        true
    }

    fn device_name(&self) -> &str {
        "fake speakers"
    }
}

/// Output backend whose streams never render; tests drain the buffer
#[derive(Default)]
pub struct FakeOutput {
    opened: AtomicUsize,
}

impl FakeOutput {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::Acquire)
    }
}

impl OutputBackend for FakeOutput {
    fn output_devices(&self) -> Result<Vec<String>> {
        Ok(vec!["fake speakers".to_string()])
    }

    fn open_output(
        &self,
        _device: &DeviceSelection,
        _spec: &PlaybackSpec,
        _buffer: Arc<PlaybackBuffer>,
    ) -> Result<Box<dyn OutputStream>> {
        self.opened.fetch_add(1, Ordering::AcqRel);
        Ok(Box::new(FakeStream))
    }
}

/// Stands in for the realtime output callback: pulls chunks at a fixed
/// pace and records the ones that aren't silent
pub struct Consumer {
    stop: Arc<AtomicBool>,
    chunks: Arc<Mutex<Vec<Vec<f32>>>>,
    handle: Option<JoinHandle<()>>,
}

impl Consumer {
    pub fn spawn(buffer: Arc<PlaybackBuffer>, pace: Duration) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let chunks = Arc::new(Mutex::new(Vec::new()));
        let flag = Arc::clone(&stop);
        let sink = Arc::clone(&chunks);
        let handle = std::thread::spawn(move || {
            while !flag.load(Ordering::Acquire) {
                let chunk = buffer.pull_chunk();
                if chunk.iter().any(|s| *s != 0.0) {
                    sink.lock().unwrap().push(chunk);
                }
                std::thread::sleep(pace);
            }
        });
        Self {
            stop,
            chunks,
            handle: Some(handle),
        }
    }

    pub fn chunks(&self) -> Vec<Vec<f32>> {
        self.chunks.lock().unwrap().clone()
    }
}

impl Drop for Consumer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Little-endian PCM16 bytes
pub fn pcm_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Scripted synthesis: each sentence maps to a marker value and a delay
///
/// The payload is one PCM16 chunk: a full-scale first sample, so peak
/// normalization is fixed, followed by the marker repeated.
pub struct FakeSynth {
    script: HashMap<String, (i16, Duration)>,
    chunk_size: usize,
    failing: Vec<String>,
    calls: AtomicUsize,
    repeat_chunks: usize,
}

impl FakeSynth {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            script: HashMap::new(),
            chunk_size,
            failing: Vec::new(),
            calls: AtomicUsize::new(0),
            repeat_chunks: 1,
        }
    }

    pub fn sentence(mut self, text: &str, marker: i16, delay: Duration) -> Self {
        self.script.insert(text.to_string(), (marker, delay));
        self
    }

    pub fn failing(mut self, text: &str) -> Self {
        self.failing.push(text.to_string());
        self
    }

    /// Make every payload `n` chunks long
    pub fn chunks_per_sentence(mut self, n: usize) -> Self {
        self.repeat_chunks = n.max(1);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Acquire)
    }
}

impl SpeechSynthesizer for FakeSynth {
    fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::AcqRel);
        if self.failing.iter().any(|f| f == text) {
            return Err(Error::Tts(format!("scripted failure for {text}")));
        }
        let (marker, delay) = self
            .script
            .get(text)
            .copied()
            .unwrap_or((1, Duration::ZERO));
        std::thread::sleep(delay);

        let mut samples = Vec::with_capacity(self.chunk_size * self.repeat_chunks);
        for _ in 0..self.repeat_chunks {
            samples.push(i16::MAX);
            samples.extend(std::iter::repeat_n(marker, self.chunk_size - 1));
        }
        Ok(pcm_bytes(&samples))
    }
}

/// Recover the marker from a chunk produced by [`FakeSynth`]
#[allow(clippy::cast_possible_truncation)]
pub fn marker(chunk: &[f32]) -> i16 {
    (chunk[1] * f32::from(i16::MAX)).round() as i16
}
