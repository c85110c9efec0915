//! Audio level monitor.
//!
//! Tracks the RMS level of the capture stream and fires a trigger callback
//! when the level rises above `threshold + noise_floor`, at most once per
//! cooldown window. Calibration temporarily diverts levels into a buffer
//! whose mean becomes the new noise floor.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, info, trace, warn};

use crate::audio::{BlockSink, CaptureBackend, CaptureStream, CpalBackend, DeviceSelector, rms};

/// Lowest accepted trigger threshold.
pub const THRESHOLD_FLOOR: f32 = 0.001;

/// Highest accepted trigger threshold.
pub const THRESHOLD_CEILING: f32 = 1.0;

/// Default minimum spacing between two triggers.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(1);

/// Calibrated noise floor is the mean ambient level times this factor.
pub const NOISE_FLOOR_FACTOR: f32 = 1.5;

/// Invoked on its own thread each time the level crosses the threshold.
pub type TriggerCallback = Arc<dyn Fn() + Send + Sync>;

/// The trigger rule, independent of any audio stream or clock.
#[derive(Debug, Clone)]
pub struct LevelDetector {
    threshold: f32,
    noise_floor: f32,
    cooldown: Duration,
    last_trigger: Option<Instant>,
    calibration: Option<Vec<f32>>,
}

impl LevelDetector {
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold: threshold.clamp(THRESHOLD_FLOOR, THRESHOLD_CEILING),
            noise_floor: 0.0,
            cooldown: DEFAULT_COOLDOWN,
            last_trigger: None,
            calibration: None,
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Set the threshold, clamped to `[THRESHOLD_FLOOR, THRESHOLD_CEILING]`.
    pub fn set_threshold(&mut self, threshold: f32) {
        self.threshold = threshold.clamp(THRESHOLD_FLOOR, THRESHOLD_CEILING);
    }

    pub fn noise_floor(&self) -> f32 {
        self.noise_floor
    }

    pub fn reset_noise_floor(&mut self) {
        self.noise_floor = 0.0;
    }

    pub fn effective_threshold(&self) -> f32 {
        self.threshold + self.noise_floor
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    pub fn set_cooldown(&mut self, cooldown: Duration) {
        self.cooldown = cooldown;
    }

    pub fn is_calibrating(&self) -> bool {
        self.calibration.is_some()
    }

    /// Feed one level reading taken at `now`. Returns true if it triggers.
    ///
    /// While calibrating the reading is buffered and never triggers.
    pub fn observe(&mut self, volume: f32, now: Instant) -> bool {
        if let Some(samples) = self.calibration.as_mut() {
            samples.push(volume);
            return false;
        }

        if volume <= self.effective_threshold() {
            return false;
        }

        if let Some(last) = self.last_trigger {
            if now.saturating_duration_since(last) <= self.cooldown {
                return false;
            }
        }

        self.last_trigger = Some(now);
        true
    }

    /// Start buffering readings for calibration, discarding any earlier buffer.
    pub fn begin_calibration(&mut self) {
        self.calibration = Some(Vec::new());
    }

    /// Stop buffering and derive the noise floor from what was collected.
    ///
    /// With no readings the noise floor is left as it was.
    pub fn finish_calibration(&mut self) -> f32 {
        let samples = self.calibration.take().unwrap_or_default();
        if samples.is_empty() {
            return self.noise_floor;
        }

        let mean = samples.iter().sum::<f32>() / samples.len() as f32;
        self.noise_floor = mean * NOISE_FLOOR_FACTOR;
        self.noise_floor
    }
}

/// State shared between the monitor handle and the audio thread.
struct MonitorCore {
    detector: Mutex<LevelDetector>,
    current_volume: AtomicU32,
    streaming: AtomicBool,
    on_trigger: TriggerCallback,
}

impl MonitorCore {
    fn detector(&self) -> MutexGuard<'_, LevelDetector> {
        self.detector.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn fire(&self, volume: f32) {
        trace!(volume, "Trigger level reached");
        let callback = Arc::clone(&self.on_trigger);
        let spawned = std::thread::Builder::new()
            .name("autocast-trigger".to_string())
            .spawn(move || callback());
        if let Err(e) = spawned {
            warn!(error = %e, "Failed to dispatch trigger");
        }
    }
}

impl BlockSink for MonitorCore {
    fn on_block(&self, block: &[f32]) {
        let volume = rms(block);
        self.current_volume.store(volume.to_bits(), Ordering::Relaxed);

        let triggered = self.detector().observe(volume, Instant::now());
        if triggered {
            self.fire(volume);
        }
    }

    fn on_stream_error(&self, message: &str) {
        warn!(error = %message, "Capture stream failed, monitor stopped");
        self.streaming.store(false, Ordering::SeqCst);
    }
}

/// Watches an audio input and calls back when it gets loud.
pub struct SoundMonitor {
    core: Arc<MonitorCore>,
    backend: Arc<dyn CaptureBackend>,
    stream: Mutex<Option<Box<dyn CaptureStream>>>,
    device: Mutex<DeviceSelector>,
}

impl SoundMonitor {
    /// Create a monitor over the system audio host.
    pub fn new(threshold: f32, on_trigger: impl Fn() + Send + Sync + 'static) -> Self {
        Self::with_backend(Arc::new(CpalBackend), threshold, on_trigger)
    }

    /// Create a monitor over any capture backend.
    pub fn with_backend(
        backend: Arc<dyn CaptureBackend>,
        threshold: f32,
        on_trigger: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        Self {
            core: Arc::new(MonitorCore {
                detector: Mutex::new(LevelDetector::new(threshold)),
                current_volume: AtomicU32::new(0.0_f32.to_bits()),
                streaming: AtomicBool::new(false),
                on_trigger: Arc::new(on_trigger),
            }),
            backend,
            stream: Mutex::new(None),
            device: Mutex::new(DeviceSelector::Auto),
        }
    }

    fn stream(&self) -> MutexGuard<'_, Option<Box<dyn CaptureStream>>> {
        self.stream.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open the capture stream and begin monitoring.
    ///
    /// Returns true if monitoring is running afterwards. Already running is
    /// success; device and stream failures are logged and return false.
    pub fn start(&self, selector: &DeviceSelector) -> bool {
        let mut stream = self.stream();
        if stream.is_some() && self.is_running() {
            debug!("Sound monitor already running");
            return true;
        }
        if let Some(stale) = stream.take() {
            stale.close();
        }

        *self.device.lock().unwrap_or_else(PoisonError::into_inner) = selector.clone();

        let sink: Arc<dyn BlockSink> = self.core.clone();
        match self.backend.open(selector, sink) {
            Ok(opened) => {
                info!(device = %opened.device_name(), "Sound monitor started");
                self.core.streaming.store(true, Ordering::SeqCst);
                *stream = Some(opened);
                true
            }
            Err(e) => {
                warn!(selector = %selector, error = %e, "Failed to start sound monitor");
                false
            }
        }
    }

    /// Close the capture stream. Safe to call at any time, any number of times.
    pub fn stop(&self) {
        let closed = self.stream().take();
        self.core.streaming.store(false, Ordering::SeqCst);
        if let Some(stream) = closed {
            stream.close();
            info!("Sound monitor stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.core.streaming.load(Ordering::SeqCst)
    }

    /// The selector passed to the last `start`.
    pub fn device(&self) -> DeviceSelector {
        self.device
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// RMS level of the most recent block.
    pub fn current_volume(&self) -> f32 {
        f32::from_bits(self.core.current_volume.load(Ordering::Relaxed))
    }

    pub fn threshold(&self) -> f32 {
        self.core.detector().threshold()
    }

    pub fn set_threshold(&self, threshold: f32) {
        self.core.detector().set_threshold(threshold);
    }

    pub fn noise_floor(&self) -> f32 {
        self.core.detector().noise_floor()
    }

    pub fn effective_threshold(&self) -> f32 {
        self.core.detector().effective_threshold()
    }

    pub fn set_trigger_cooldown(&self, cooldown: Duration) {
        self.core.detector().set_cooldown(cooldown);
    }

    pub fn reset_calibration(&self) {
        self.core.detector().reset_noise_floor();
        debug!("Noise floor reset");
    }

    /// Measure ambient level for `duration` and adopt it as the noise floor.
    ///
    /// Blocks the caller for `duration`. Returns 0 without measuring if the
    /// monitor is not running.
    pub fn calibrate(&self, duration: Duration) -> f32 {
        if !self.is_running() {
            info!("Sound monitor not running, skipping calibration");
            return 0.0;
        }

        info!(seconds = duration.as_secs_f32(), "Calibrating noise floor");
        self.core.detector().begin_calibration();
        std::thread::sleep(duration);
        let noise_floor = self.core.detector().finish_calibration();
        info!(noise_floor, "Calibration finished");
        noise_floor
    }

    /// Feed one block of mono samples through the detector, exactly as the
    /// capture stream does.
    pub fn process_block(&self, block: &[f32]) {
        self.core.on_block(block);
    }
}

impl Drop for SoundMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
#[path = "monitor_test.rs"]
mod tests;
