//! Audio input discovery and capture.
//!
//! Enumerates input devices, picks a sensible default (a loopback/"stereo
//! mix" device when one exists, so the game's own output can be heard), and
//! runs a cpal input stream that delivers fixed-size mono blocks to a sink.

use std::fmt;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Samples per analysis block.
pub const BLOCK_SIZE: usize = 1024;

/// Device name fragments that identify system-output loopback inputs.
const LOOPBACK_HINTS: [&str; 4] = ["loopback", "stereo mix", "what u hear", "立体声混音"];

/// Which input device to capture from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DeviceSelector {
    /// The recommended device (loopback if present, else the default input).
    #[default]
    Auto,
    /// Position in the input device list.
    Index(usize),
    /// First device whose name contains this text (case-insensitive).
    Name(String),
}

impl DeviceSelector {
    /// Interpret a config or command-line value: digits select by index,
    /// anything else by name, and nothing means auto.
    pub fn from_config(value: Option<&str>) -> Self {
        match value.map(str::trim).filter(|v| !v.is_empty()) {
            None => DeviceSelector::Auto,
            Some(v) => match v.parse::<usize>() {
                Ok(index) => DeviceSelector::Index(index),
                Err(_) => DeviceSelector::Name(v.to_string()),
            },
        }
    }
}

impl fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceSelector::Auto => write!(f, "auto"),
            DeviceSelector::Index(index) => write!(f, "#{}", index),
            DeviceSelector::Name(name) => write!(f, "{:?}", name),
        }
    }
}

/// An input device as reported by the audio host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub index: usize,
    pub name: String,
    pub channels: u16,
    pub default_sample_rate: u32,
}

/// Whether a device name looks like a system-output loopback.
pub fn is_loopback_name(name: &str) -> bool {
    let lower = name.to_lowercase();
    LOOPBACK_HINTS.iter().any(|hint| lower.contains(hint))
}

/// Pick the device to use when none is configured: the first loopback
/// input, else the host's default input.
pub fn recommend(devices: &[DeviceInfo], default_name: Option<&str>) -> Option<(usize, String)> {
    devices
        .iter()
        .find(|d| d.channels > 0 && is_loopback_name(&d.name))
        .or_else(|| {
            let default_name = default_name?;
            devices.iter().find(|d| d.name == default_name)
        })
        .map(|d| (d.index, d.name.clone()))
}

#[allow(deprecated)]
fn device_name(device: &cpal::Device, index: usize) -> String {
    device
        .name()
        .unwrap_or_else(|_| format!("Input {}", index + 1))
}

/// List input devices on the default host.
///
/// Devices that cannot report an input configuration are left out; indices
/// still follow the host's enumeration order so they resolve consistently.
pub fn list_input_devices() -> Vec<DeviceInfo> {
    let host = cpal::default_host();
    let inputs = match host.input_devices() {
        Ok(inputs) => inputs,
        Err(e) => {
            warn!(error = %e, "Failed to enumerate input devices");
            return Vec::new();
        }
    };

    inputs
        .enumerate()
        .filter_map(|(index, device)| {
            let name = device_name(&device, index);
            match device.default_input_config() {
                Ok(config) => Some(DeviceInfo {
                    index,
                    name,
                    channels: config.channels(),
                    default_sample_rate: config.sample_rate(),
                }),
                Err(e) => {
                    debug!(device = %name, error = %e, "Skipping device without input config");
                    None
                }
            }
        })
        .collect()
}

/// The device [`DeviceSelector::Auto`] would capture from.
pub fn recommended_device() -> Option<(usize, String)> {
    let host = cpal::default_host();
    let default_name = host
        .default_input_device()
        .map(|device| device_name(&device, 0));
    recommend(&list_input_devices(), default_name.as_deref())
}

fn resolve_input_device(selector: &DeviceSelector) -> Result<(cpal::Device, String)> {
    let host = cpal::default_host();
    let mut inputs = host
        .input_devices()
        .map_err(|e| Error::DeviceUnavailable(format!("cannot enumerate inputs: {}", e)))?;

    match selector {
        DeviceSelector::Auto => {
            let loopback = inputs
                .enumerate()
                .map(|(index, device)| {
                    let name = device_name(&device, index);
                    (device, name)
                })
                .find(|(_, name)| is_loopback_name(name));
            if let Some(found) = loopback {
                return Ok(found);
            }
            let device = host
                .default_input_device()
                .ok_or_else(|| Error::DeviceUnavailable("no default input device".to_string()))?;
            let name = device_name(&device, 0);
            Ok((device, name))
        }
        DeviceSelector::Index(index) => {
            let device = inputs.nth(*index).ok_or_else(|| {
                Error::DeviceUnavailable(format!("no input device at index {}", index))
            })?;
            let name = device_name(&device, *index);
            Ok((device, name))
        }
        DeviceSelector::Name(wanted) => {
            let wanted_lower = wanted.to_lowercase();
            inputs
                .enumerate()
                .map(|(index, device)| {
                    let name = device_name(&device, index);
                    (device, name)
                })
                .find(|(_, name)| name.to_lowercase().contains(&wanted_lower))
                .ok_or_else(|| {
                    Error::DeviceUnavailable(format!("no input device matching {:?}", wanted))
                })
        }
    }
}

/// Root-mean-square amplitude of a block. Zero for an empty block.
pub fn rms(block: &[f32]) -> f32 {
    if block.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = block.iter().map(|&s| f64::from(s) * f64::from(s)).sum();
    (sum_sq / block.len() as f64).sqrt() as f32
}

/// Convert multi-channel interleaved samples to mono by averaging all channels.
pub fn to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }

    let channels = channels as usize;
    samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Cuts an interleaved stream into fixed-size mono blocks.
#[derive(Debug)]
pub struct BlockFramer {
    block_size: usize,
    channels: usize,
    pending: Vec<f32>,
}

impl BlockFramer {
    pub fn new(block_size: usize, channels: u16) -> Self {
        let block_size = block_size.max(1);
        Self {
            block_size,
            channels: usize::from(channels.max(1)),
            pending: Vec::with_capacity(block_size),
        }
    }

    /// Downmix `samples` and call `emit` once per completed block.
    /// A trailing partial frame is dropped; a partial block is kept.
    pub fn push(&mut self, samples: &[f32], mut emit: impl FnMut(&[f32])) {
        for frame in samples.chunks_exact(self.channels) {
            self.pending
                .push(frame.iter().sum::<f32>() / self.channels as f32);
            if self.pending.len() == self.block_size {
                emit(&self.pending);
                self.pending.clear();
            }
        }
    }

    /// Samples waiting for the next block.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

/// Receives mono blocks from a capture stream.
///
/// Called on the audio thread: implementations must return quickly.
pub trait BlockSink: Send + Sync {
    fn on_block(&self, block: &[f32]);
    fn on_stream_error(&self, message: &str);
}

/// Opens capture streams. Implemented over cpal for real devices.
pub trait CaptureBackend: Send + Sync {
    fn open(&self, selector: &DeviceSelector, sink: Arc<dyn BlockSink>)
    -> Result<Box<dyn CaptureStream>>;
}

/// A running capture stream. Dropping or closing it stops delivery.
pub trait CaptureStream: Send {
    fn device_name(&self) -> &str;
    fn close(self: Box<Self>);
}

enum Control {
    Stop,
    Failed(String),
}

/// Capture backend for the default cpal host.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalBackend;

impl CaptureBackend for CpalBackend {
    fn open(
        &self,
        selector: &DeviceSelector,
        sink: Arc<dyn BlockSink>,
    ) -> Result<Box<dyn CaptureStream>> {
        // cpal streams are not Send, so the stream lives on its own thread
        // for its whole life and is dropped there.
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<String>>(1);
        let (control_tx, control_rx) = mpsc::channel::<Control>();
        let error_tx = control_tx.clone();
        let selector = selector.clone();

        let thread = std::thread::Builder::new()
            .name("autocast-capture".to_string())
            .spawn(move || {
                let stream = match start_stream(&selector, sink.clone(), error_tx) {
                    Ok((stream, name)) => {
                        let _ = ready_tx.send(Ok(name));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                match control_rx.recv() {
                    Ok(Control::Failed(message)) => sink.on_stream_error(&message),
                    Ok(Control::Stop) | Err(_) => debug!("Capture stream stop requested"),
                }

                let _ = stream.pause();
                drop(stream);
                debug!("Capture stream closed");
            })
            .map_err(|e| Error::Stream(format!("failed to spawn capture thread: {}", e)))?;

        let name = ready_rx
            .recv()
            .map_err(|_| Error::Stream("capture thread exited before reporting".to_string()))??;

        Ok(Box::new(CpalStream {
            name,
            control: control_tx,
            thread: Some(thread),
        }))
    }
}

struct CpalStream {
    name: String,
    control: mpsc::Sender<Control>,
    thread: Option<JoinHandle<()>>,
}

impl CaptureStream for CpalStream {
    fn device_name(&self) -> &str {
        &self.name
    }

    fn close(mut self: Box<Self>) {
        let _ = self.control.send(Control::Stop);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for CpalStream {
    fn drop(&mut self) {
        let _ = self.control.send(Control::Stop);
    }
}

fn start_stream(
    selector: &DeviceSelector,
    sink: Arc<dyn BlockSink>,
    error_tx: mpsc::Sender<Control>,
) -> Result<(cpal::Stream, String)> {
    let (device, name) = resolve_input_device(selector)?;

    let config = device
        .default_input_config()
        .map_err(|e| Error::DeviceUnavailable(format!("{}: {}", name, e)))?;

    let channels = config.channels();
    info!(
        device = %name,
        sample_rate = config.sample_rate(),
        channels = channels,
        format = ?config.sample_format(),
        "Opening capture stream"
    );

    let mut framer = BlockFramer::new(BLOCK_SIZE, channels);
    let on_data = move |samples: &[f32]| {
        framer.push(samples, |block| sink.on_block(block));
    };

    let stream = match config.sample_format() {
        cpal::SampleFormat::F32 => {
            build_input::<f32>(&device, &config.into(), |s| s, on_data, error_tx)
        }
        cpal::SampleFormat::I16 => build_input::<i16>(
            &device,
            &config.into(),
            |s| s as f32 / 32768.0,
            on_data,
            error_tx,
        ),
        cpal::SampleFormat::U16 => build_input::<u16>(
            &device,
            &config.into(),
            |s| (s as f32 - 32768.0) / 32768.0,
            on_data,
            error_tx,
        ),
        format => Err(Error::Stream(format!(
            "unsupported sample format: {:?}",
            format
        ))),
    }?;

    stream
        .play()
        .map_err(|e| Error::Stream(format!("failed to start audio stream: {}", e)))?;

    Ok((stream, name))
}

fn build_input<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    convert: fn(T) -> f32,
    mut on_data: impl FnMut(&[f32]) + Send + 'static,
    error_tx: mpsc::Sender<Control>,
) -> Result<cpal::Stream>
where
    T: cpal::SizedSample + 'static,
{
    let mut scratch: Vec<f32> = Vec::new();
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                scratch.clear();
                scratch.extend(data.iter().map(|&s| convert(s)));
                on_data(&scratch);
            },
            move |err| {
                warn!(error = %err, "Audio stream error");
                let _ = error_tx.send(Control::Failed(err.to_string()));
            },
            None,
        )
        .map_err(|e| Error::Stream(format!("failed to build input stream: {}", e)))
}

#[cfg(test)]
#[path = "audio_test.rs"]
mod tests;
