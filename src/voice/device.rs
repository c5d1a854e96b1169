//! Audio device selection and the backend seams the pipeline runs on
//!
//! Devices are chosen by display name, never by index: indices shift between
//! enumerations, and hosts often report the same name more than once.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;

use super::buffer::PlaybackBuffer;
use super::frame::AudioFrame;
use crate::Result;

/// Reference to an audio device by stable display name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum DeviceSelection {
    /// The host's default device
    #[default]
    Default,
    /// A device with this display name
    Named(String),
}

impl DeviceSelection {
    /// Selection from an optional configured name; empty means default
    #[must_use]
    pub fn from_name(name: Option<String>) -> Self {
        match name {
            Some(n) if !n.trim().is_empty() => Self::Named(n),
            _ => Self::Default,
        }
    }

    /// Display label used in logs
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::Default => "default",
            Self::Named(name) => name,
        }
    }
}

/// Input and output device names available on the host
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceList {
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

/// Host driver suffixes that make one physical device show up several times
const DRIVER_SUFFIXES: &[&str] = &[" (AMD High Definition Audio Device)"];

/// Enumeration counters such as `(2-` in the middle or `(3)` at the end
static ENUMERATION_MARKER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\s*\(\d+(?:-\s*|\)\s*$)").ok());

/// Strip driver suffixes and enumeration counters from a host device name
#[must_use]
pub fn clean_device_name(name: &str) -> String {
    let mut cleaned = name.to_string();
    for suffix in DRIVER_SUFFIXES {
        cleaned = cleaned.replace(suffix, "");
    }
    if let Some(re) = ENUMERATION_MARKER.as_ref() {
        cleaned = re.replace_all(&cleaned, " ").into_owned();
    }
    let mut cleaned = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    if cleaned.matches(')').count() > cleaned.matches('(').count() && cleaned.ends_with(')') {
        cleaned.pop();
    }
    cleaned
}

/// Remove repeated names, keeping the first occurrence and original order
#[must_use]
pub fn dedup_names<I>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut seen = std::collections::HashSet::new();
    names
        .into_iter()
        .filter(|name| seen.insert(name.clone()))
        .collect()
}

/// Format requested from an input device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureSpec {
    pub sample_rate: u32,
    pub chunk_size: usize,
    pub channels: u16,
}

/// Format requested from an output device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackSpec {
    pub sample_rate: u32,
    pub channels: u16,
}

/// An open input stream delivering fixed-size frames
pub trait InputSource: Send {
    /// Block up to `timeout` for the next full frame
    ///
    /// Returns `Ok(None)` when no full frame arrived in time, so callers can
    /// poll a stop flag between reads.
    ///
    /// # Errors
    ///
    /// Returns error if the device failed or disconnected
    fn read_frame(&mut self, timeout: Duration) -> Result<Option<AudioFrame>>;

    /// Name of the device this source reads from
    fn device_name(&self) -> &str;
}

/// Opens input streams
pub trait InputBackend: Send + Sync {
    /// Names of available input devices, deduplicated
    ///
    /// # Errors
    ///
    /// Returns error if the host cannot enumerate devices
    fn input_devices(&self) -> Result<Vec<String>>;

    /// Open an input stream on `device`
    ///
    /// # Errors
    ///
    /// Returns error if the device cannot be opened with `spec`
    fn open_input(
        &self,
        device: &DeviceSelection,
        spec: &CaptureSpec,
    ) -> Result<Box<dyn InputSource>>;
}

/// A running output stream; dropping it closes the device
pub trait OutputStream: Send {
    /// False once the device reported an error or disconnected
    fn is_alive(&self) -> bool;

    /// Name of the device being played to
    fn device_name(&self) -> &str;
}

/// Opens output streams that render from a [`PlaybackBuffer`]
pub trait OutputBackend: Send + Sync {
    /// Names of available output devices, deduplicated
    ///
    /// # Errors
    ///
    /// Returns error if the host cannot enumerate devices
    fn output_devices(&self) -> Result<Vec<String>>;

    /// Open an output stream on `device` whose callback drains `buffer`
    ///
    /// # Errors
    ///
    /// Returns error if the device cannot be opened with `spec`
    fn open_output(
        &self,
        device: &DeviceSelection,
        spec: &PlaybackSpec,
        buffer: Arc<PlaybackBuffer>,
    ) -> Result<Box<dyn OutputStream>>;
}

/// Open `device`, falling back to the system default if it fails
///
/// # Errors
///
/// Returns error if neither the selected nor the default device opens
pub fn open_input_with_fallback(
    backend: &dyn InputBackend,
    device: &DeviceSelection,
    spec: &CaptureSpec,
) -> Result<Box<dyn InputSource>> {
    match backend.open_input(device, spec) {
        Ok(source) => Ok(source),
        Err(e) if *device != DeviceSelection::Default => {
            tracing::warn!(
                device = device.label(),
                error = %e,
                "failed to open input device, trying system default"
            );
            backend.open_input(&DeviceSelection::Default, spec)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_keeps_first_occurrence() {
        let names = vec![
            "Speakers".to_string(),
            "Headset".to_string(),
            "Speakers".to_string(),
            "HDMI".to_string(),
            "Headset".to_string(),
        ];
        assert_eq!(dedup_names(names), vec!["Speakers", "Headset", "HDMI"]);
    }

    #[test]
    fn test_clean_device_name() {
        assert_eq!(
            clean_device_name("Speakers (AMD High Definition Audio Device)"),
            "Speakers"
        );
        assert_eq!(
            clean_device_name("Microphone (2- USB Audio Device)"),
            "Microphone USB Audio Device"
        );
        assert_eq!(clean_device_name("Headset (3)"), "Headset");
        assert_eq!(clean_device_name("  Line   In  "), "Line In");
    }

    #[test]
    fn test_selection_from_name() {
        assert_eq!(DeviceSelection::from_name(None), DeviceSelection::Default);
        assert_eq!(
            DeviceSelection::from_name(Some("  ".to_string())),
            DeviceSelection::Default
        );
        assert_eq!(
            DeviceSelection::from_name(Some("Mic".to_string())),
            DeviceSelection::Named("Mic".to_string())
        );
        assert_eq!(DeviceSelection::Default.label(), "default");
    }
}
