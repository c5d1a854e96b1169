//! `cpal` implementations of the device backends
//!
//! cpal streams are not `Send`, so each one lives on its own thread for as
//! long as it is open. The handle returned to callers only holds channels to
//! that thread, and dropping the handle shuts the stream down.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, StreamConfig, SupportedStreamConfigRange};

use super::buffer::PlaybackBuffer;
use super::device::{
    CaptureSpec, DeviceList, DeviceSelection, InputBackend, InputSource, OutputBackend,
    OutputStream, PlaybackSpec, clean_device_name, dedup_names,
};
use super::frame::{AudioFrame, f32_to_i16};
use crate::{Error, Result};

/// Callback blocks in flight between the input callback and the reader
const INPUT_QUEUE_BLOCKS: usize = 64;

/// How long to wait for a stream thread to report it opened
const OPEN_TIMEOUT: Duration = Duration::from_secs(5);

/// The system audio host
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalHost;

impl CpalHost {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

/// Enumerate input and output devices on the default host
///
/// # Errors
///
/// Returns error if the host cannot enumerate devices
pub fn list_devices() -> Result<DeviceList> {
    let host = CpalHost::new();
    Ok(DeviceList {
        inputs: host.input_devices()?,
        outputs: host.output_devices()?,
    })
}

impl InputBackend for CpalHost {
    fn input_devices(&self) -> Result<Vec<String>> {
        let devices = cpal::default_host()
            .input_devices()
            .map_err(|e| Error::Device(e.to_string()))?;
        Ok(dedup_names(
            devices.filter_map(|d| d.name().ok().map(|n| clean_device_name(&n))),
        ))
    }

    fn open_input(
        &self,
        device: &DeviceSelection,
        spec: &CaptureSpec,
    ) -> Result<Box<dyn InputSource>> {
        let (samples_tx, samples_rx) = mpsc::sync_channel(INPUT_QUEUE_BLOCKS);
        let alive = Arc::new(AtomicBool::new(true));
        let selection = device.clone();
        let spec = *spec;
        let stream_alive = Arc::clone(&alive);

        let (name, shutdown, thread) = spawn_stream_thread("junin-input", move || {
            build_input(&selection, &spec, samples_tx, stream_alive)
        })?;

        tracing::debug!(device = %name, sample_rate = spec.sample_rate, "input stream opened");

        Ok(Box::new(CpalInputSource {
            name,
            samples: samples_rx,
            pending: Vec::with_capacity(spec.chunk_size * 2),
            chunk_size: spec.chunk_size.max(1),
            alive,
            shutdown: Some(shutdown),
            thread: Some(thread),
        }))
    }
}

impl OutputBackend for CpalHost {
    fn output_devices(&self) -> Result<Vec<String>> {
        let devices = cpal::default_host()
            .output_devices()
            .map_err(|e| Error::Device(e.to_string()))?;
        Ok(dedup_names(
            devices.filter_map(|d| d.name().ok().map(|n| clean_device_name(&n))),
        ))
    }

    fn open_output(
        &self,
        device: &DeviceSelection,
        spec: &PlaybackSpec,
        buffer: Arc<PlaybackBuffer>,
    ) -> Result<Box<dyn OutputStream>> {
        let alive = Arc::new(AtomicBool::new(true));
        let selection = device.clone();
        let spec = *spec;
        let stream_alive = Arc::clone(&alive);

        let (name, shutdown, thread) = spawn_stream_thread("junin-output", move || {
            build_output(&selection, &spec, buffer, stream_alive)
        })?;

        Ok(Box::new(CpalOutputStream {
            name,
            alive,
            shutdown: Some(shutdown),
            thread: Some(thread),
        }))
    }
}

/// Run `build` on a new thread and keep its stream alive until shutdown
fn spawn_stream_thread<F>(
    thread_name: &str,
    build: F,
) -> Result<(String, Sender<()>, JoinHandle<()>)>
where
    F: FnOnce() -> Result<(cpal::Stream, String)> + Send + 'static,
{
    let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<String>>(1);
    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

    let thread = std::thread::Builder::new()
        .name(thread_name.to_string())
        .spawn(move || {
            let stream = match build() {
                Ok((stream, name)) => {
                    let _ = ready_tx.send(Ok(name));
                    stream
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            // Blocks until the handle sends or is dropped
            let _ = shutdown_rx.recv();
            drop(stream);
        })
        .map_err(Error::Io)?;

    match ready_rx.recv_timeout(OPEN_TIMEOUT) {
        Ok(Ok(name)) => Ok((name, shutdown_tx, thread)),
        Ok(Err(e)) => {
            let _ = thread.join();
            Err(e)
        }
        Err(_) => {
            drop(shutdown_tx);
            Err(Error::Device("timed out opening audio stream".to_string()))
        }
    }
}

fn find_device<I>(mut devices: I, selection: &DeviceSelection, default: Option<Device>) -> Result<Device>
where
    I: Iterator<Item = Device>,
{
    match selection {
        DeviceSelection::Default => {
            default.ok_or_else(|| Error::Device("no default audio device".to_string()))
        }
        DeviceSelection::Named(name) => devices
            .find(|d| d.name().is_ok_and(|n| clean_device_name(&n) == *name))
            .ok_or_else(|| Error::Device(format!("audio device not found: {name}"))),
    }
}

fn supports_rate(range: &SupportedStreamConfigRange, rate: u32) -> bool {
    range.min_sample_rate() <= SampleRate(rate) && range.max_sample_rate() >= SampleRate(rate)
}

/// Pick a config at `rate`, preferring `channels`, then any channel count
fn pick_config<I>(ranges: I, rate: u32, channels: u16) -> Result<StreamConfig>
where
    I: Iterator<Item = SupportedStreamConfigRange>,
{
    let ranges: Vec<_> = ranges.filter(|r| supports_rate(r, rate)).collect();
    let range = ranges
        .iter()
        .find(|r| r.channels() == channels)
        .or_else(|| ranges.first())
        .cloned()
        .ok_or_else(|| Error::Device(format!("no supported config at {rate} Hz")))?;
    Ok(range.with_sample_rate(SampleRate(rate)).config())
}

fn build_input(
    selection: &DeviceSelection,
    spec: &CaptureSpec,
    samples: SyncSender<Vec<i16>>,
    alive: Arc<AtomicBool>,
) -> Result<(cpal::Stream, String)> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| Error::Device(e.to_string()))?;
    let device = find_device(devices, selection, host.default_input_device())?;
    let name = device
        .name()
        .map_or_else(|_| selection.label().to_string(), |n| clean_device_name(&n));

    let ranges = device
        .supported_input_configs()
        .map_err(|e| Error::Device(e.to_string()))?;
    let config = pick_config(ranges, spec.sample_rate, spec.channels)?;
    let channels = usize::from(config.channels).max(1);

    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let mono: Vec<i16> = data
                    .chunks(channels)
                    .map(|frame| {
                        #[allow(clippy::cast_precision_loss)]
                        let mixed = frame.iter().sum::<f32>() / frame.len() as f32;
                        f32_to_i16(mixed)
                    })
                    .collect();
                // Reader fell behind; dropping keeps the callback non-blocking
                let _ = samples.try_send(mono);
            },
            move |err| {
                tracing::error!(error = %err, "audio capture error");
                alive.store(false, Ordering::Release);
            },
            None,
        )
        .map_err(|e| Error::Device(e.to_string()))?;

    stream.play().map_err(|e| Error::Device(e.to_string()))?;
    Ok((stream, name))
}

fn build_output(
    selection: &DeviceSelection,
    spec: &PlaybackSpec,
    buffer: Arc<PlaybackBuffer>,
    alive: Arc<AtomicBool>,
) -> Result<(cpal::Stream, String)> {
    let host = cpal::default_host();
    let devices = host
        .output_devices()
        .map_err(|e| Error::Device(e.to_string()))?;
    let device = find_device(devices, selection, host.default_output_device())?;
    let name = device
        .name()
        .map_or_else(|_| selection.label().to_string(), |n| clean_device_name(&n));

    let ranges = device
        .supported_output_configs()
        .map_err(|e| Error::Device(e.to_string()))?;
    let config = pick_config(ranges, spec.sample_rate, spec.channels)?;
    let channels = usize::from(config.channels);

    tracing::debug!(
        device = %name,
        sample_rate = spec.sample_rate,
        channels,
        "audio playback initialized"
    );

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                buffer.render(data, channels);
            },
            move |err| {
                tracing::error!(error = %err, "audio playback error");
                alive.store(false, Ordering::Release);
            },
            None,
        )
        .map_err(|e| Error::Device(e.to_string()))?;

    stream.play().map_err(|e| Error::Device(e.to_string()))?;
    Ok((stream, name))
}

struct CpalInputSource {
    name: String,
    samples: Receiver<Vec<i16>>,
    pending: Vec<i16>,
    chunk_size: usize,
    alive: Arc<AtomicBool>,
    shutdown: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl InputSource for CpalInputSource {
    fn read_frame(&mut self, timeout: Duration) -> Result<Option<AudioFrame>> {
        let deadline = Instant::now() + timeout;
        while self.pending.len() < self.chunk_size {
            if !self.alive.load(Ordering::Acquire) {
                return Err(Error::Device(format!("input device failed: {}", self.name)));
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.samples.recv_timeout(remaining) {
                Ok(block) => self.pending.extend_from_slice(&block),
                Err(RecvTimeoutError::Timeout) => return Ok(None),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(Error::Device(format!("input stream closed: {}", self.name)));
                }
            }
        }
        let frame: Vec<i16> = self.pending.drain(..self.chunk_size).collect();
        Ok(Some(AudioFrame::new(frame)))
    }

    fn device_name(&self) -> &str {
        &self.name
    }
}

impl Drop for CpalInputSource {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        tracing::debug!(device = %self.name, "input stream closed");
    }
}

struct CpalOutputStream {
    name: String,
    alive: Arc<AtomicBool>,
    shutdown: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl OutputStream for CpalOutputStream {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    fn device_name(&self) -> &str {
        &self.name
    }
}

impl Drop for CpalOutputStream {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
