//! Control state machine.
//!
//! One worker thread runs the cycle bait check → cast → wait for a bite or
//! the timeout → hook, pressing keys through the [`KeystrokeEmitter`] and
//! waking from the wait when the [`SoundMonitor`] hears the cue. State,
//! stats, and log lines go out through the optional [`EventSink`].

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::audio::{CaptureBackend, CpalBackend, DeviceSelector};
use crate::config::Config;
use crate::error::Result;
use crate::events::{EventSink, timestamped};
use crate::inject::{EnigoBackend, KeyBackend, KeystrokeEmitter, random_delay};
use crate::monitor::SoundMonitor;
use crate::signal::Signal;
use crate::stats::{Stats, StatsSnapshot};

/// How long `stop()` waits for the worker to finish.
pub const JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Where the bot is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FishingState {
    #[default]
    Idle,
    PreAction,
    Casting,
    Waiting,
    Hooking,
    Paused,
}

impl fmt::Display for FishingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FishingState::Idle => "Idle",
            FishingState::PreAction => "Applying bait",
            FishingState::Casting => "Casting",
            FishingState::Waiting => "Waiting for a bite",
            FishingState::Hooking => "Hooking",
            FishingState::Paused => "Paused",
        };
        f.write_str(label)
    }
}

/// Fixed pauses around actions, in milliseconds, and loop timings.
#[derive(Debug, Clone, PartialEq)]
pub struct Pacing {
    /// After pressing the pre-action key.
    pub bait_ms: (u64, u64),
    /// After pressing the cast key.
    pub cast_ms: (u64, u64),
    /// How often a paused loop rechecks the pause flag.
    pub pause_poll: Duration,
    /// Backoff after a failed iteration.
    pub error_backoff: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            bait_ms: (2000, 3000),
            cast_ms: (1500, 2500),
            pause_poll: Duration::from_millis(100),
            error_backoff: Duration::from_secs(1),
        }
    }
}

/// State shared between the controller handle, the worker thread, and the
/// monitor's trigger callback.
struct Shared {
    config: Mutex<Config>,
    pacing: Mutex<Pacing>,
    state: Mutex<FishingState>,
    stats: Mutex<Stats>,
    keys: Mutex<KeystrokeEmitter>,
    running: AtomicBool,
    paused: AtomicBool,
    /// Raised by the monitor while waiting, and by `stop()`.
    trigger: Signal,
    /// Raised by `stop()` to cut pacing sleeps short.
    halt: Signal,
    sink: Option<Arc<dyn EventSink>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn state(&self) -> FishingState {
        *lock(&self.state)
    }

    fn set_state(&self, state: FishingState) {
        *lock(&self.state) = state;
        debug!(state = ?state, "State changed");
        if let Some(sink) = &self.sink {
            sink.on_state(state);
        }
    }

    fn log(&self, message: &str) {
        info!("{}", message);
        if let Some(sink) = &self.sink {
            sink.on_log(&timestamped(message));
        }
    }

    fn snapshot(&self) -> StatsSnapshot {
        lock(&self.stats).snapshot(Instant::now())
    }

    fn update_stats(&self, update: impl FnOnce(&mut Stats)) {
        let snapshot = {
            let mut stats = lock(&self.stats);
            update(&mut stats);
            stats.snapshot(Instant::now())
        };
        if let Some(sink) = &self.sink {
            sink.on_stats(&snapshot);
        }
    }

    /// Press a key unless the run has been stopped.
    fn press(&self, key: &str) -> bool {
        if !self.is_running() {
            return false;
        }
        lock(&self.keys).press_key(key)
    }

    /// Sleep a random delay in `range`. Returns false if stopped meanwhile.
    fn pace(&self, (min_ms, max_ms): (u64, u64)) -> bool {
        !self.halt.wait_timeout(random_delay(min_ms, max_ms)) && self.is_running()
    }

    fn on_trigger(&self) {
        if self.state() == FishingState::Waiting {
            self.trigger.set();
        }
    }
}

/// Bookkeeping carried across cycles of one run.
#[derive(Debug, Default)]
struct Cycle {
    last_bait: Option<Instant>,
}

impl Cycle {
    fn bait_due(&self, interval: Duration, now: Instant) -> bool {
        match self.last_bait {
            Some(last) => now.saturating_duration_since(last) >= interval,
            None => true,
        }
    }
}

fn run_loop(shared: Arc<Shared>, done: mpsc::Sender<()>) {
    debug!("Control loop started");
    let mut cycle = Cycle::default();

    while shared.is_running() {
        if shared.paused.load(Ordering::SeqCst) {
            if shared.state() != FishingState::Paused {
                shared.set_state(FishingState::Paused);
            }
            let poll = lock(&shared.pacing).pause_poll;
            shared.halt.wait_timeout(poll);
            continue;
        }

        if let Err(e) = run_cycle(&shared, &mut cycle) {
            error!(error = %e, "Cycle failed");
            shared.log(&format!("Error: {}", e));
            let backoff = lock(&shared.pacing).error_backoff;
            shared.halt.wait_timeout(backoff);
        }
    }

    debug!("Control loop finished");
    let _ = done.send(());
}

/// One pass of bait check, cast, wait, and hook or timeout.
///
/// Returns early without error when the run is stopped between steps.
fn run_cycle(shared: &Shared, cycle: &mut Cycle) -> Result<()> {
    let config = lock(&shared.config).clone();
    config.validate()?;
    let pacing = lock(&shared.pacing).clone();

    if cycle.bait_due(config.bait_interval_duration(), Instant::now()) {
        if !shared.is_running() {
            return Ok(());
        }
        shared.set_state(FishingState::PreAction);
        shared.log("Applying bait");
        shared.press(&config.pre_action_key);
        shared.update_stats(|s| s.baits_applied += 1);
        cycle.last_bait = Some(Instant::now());
        if !shared.pace(pacing.bait_ms) {
            return Ok(());
        }
    }

    if !shared.is_running() {
        return Ok(());
    }
    shared.set_state(FishingState::Casting);
    shared.log("Casting");
    shared.press(&config.fishing_key);
    shared.update_stats(|s| s.total_casts += 1);
    if !shared.pace(pacing.cast_ms) {
        return Ok(());
    }

    // Clear before the running check: a stop() that lands after the check
    // raises the trigger again and the wait returns at once.
    shared.trigger.clear();
    if !shared.is_running() {
        return Ok(());
    }
    shared.set_state(FishingState::Waiting);
    shared.log("Waiting for a bite");
    let waiting_since = Instant::now();
    let triggered = shared.trigger.wait_timeout(config.timeout_duration());
    if !shared.is_running() {
        return Ok(());
    }

    if triggered {
        shared.set_state(FishingState::Hooking);
        shared.log(&format!(
            "Bite after {:.1}s, hooking",
            waiting_since.elapsed().as_secs_f32()
        ));
        if !shared.pace(config.hook_delay_range()) {
            return Ok(());
        }
        shared.press(&config.interact_key);
        shared.update_stats(|s| s.successful_hooks += 1);
        shared.pace(config.cast_delay_range());
    } else {
        shared.update_stats(|s| s.timeouts += 1);
        shared.log("No bite before timeout, casting again");
    }

    Ok(())
}

struct Worker {
    handle: JoinHandle<()>,
    done: mpsc::Receiver<()>,
}

/// Drives the bait/cast/wait/hook cycle.
pub struct Controller {
    shared: Arc<Shared>,
    monitor: SoundMonitor,
    worker: Mutex<Option<Worker>>,
}

impl Controller {
    /// Create a controller over the system audio host and keyboard.
    pub fn new(config: Config, sink: Option<Arc<dyn EventSink>>) -> Result<Self> {
        let keys = EnigoBackend::new()?;
        Ok(Self::with_backends(
            config,
            sink,
            Arc::new(CpalBackend),
            Box::new(keys),
        ))
    }

    /// Create a controller over any capture and keyboard backends.
    pub fn with_backends(
        mut config: Config,
        sink: Option<Arc<dyn EventSink>>,
        capture: Arc<dyn CaptureBackend>,
        keys: Box<dyn KeyBackend>,
    ) -> Self {
        let threshold = config.update_threshold();
        let cooldown = config.trigger_cooldown_duration();

        let shared = Arc::new(Shared {
            config: Mutex::new(config),
            pacing: Mutex::new(Pacing::default()),
            state: Mutex::new(FishingState::Idle),
            stats: Mutex::new(Stats::default()),
            keys: Mutex::new(KeystrokeEmitter::with_backend(keys)),
            running: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            trigger: Signal::new(),
            halt: Signal::new(),
            sink,
        });

        let listener = Arc::clone(&shared);
        let monitor = SoundMonitor::with_backend(capture, threshold, move || listener.on_trigger());
        monitor.set_trigger_cooldown(cooldown);

        Self {
            shared,
            monitor,
            worker: Mutex::new(None),
        }
    }

    /// Replace the pacing delays. Takes effect at the next cycle.
    pub fn set_pacing(&self, pacing: Pacing) {
        *lock(&self.shared.pacing) = pacing;
    }

    /// Start the monitor and the control loop.
    ///
    /// Returns true if running afterwards. Fails without side effects when
    /// the monitor cannot open its device or when the worker of an earlier
    /// run is still alive.
    pub fn start(&self) -> bool {
        if self.is_running() {
            return true;
        }

        // A previous worker that outlived its join timeout gets one more
        // chance; while it is alive no second loop may start
        let stale = lock(&self.worker).take();
        if let Some(stale) = stale {
            match stale.done.recv_timeout(JOIN_TIMEOUT) {
                Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => {
                    let _ = stale.handle.join();
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    warn!("Previous control loop still running, not starting");
                    self.shared.log("Previous run has not finished yet");
                    *lock(&self.worker) = Some(stale);
                    return false;
                }
            }
        }

        let (threshold, cooldown, selector) = {
            let mut config = lock(&self.shared.config);
            let threshold = config.update_threshold();
            let selector = DeviceSelector::from_config(config.audio_device.as_deref());
            (threshold, config.trigger_cooldown_duration(), selector)
        };
        self.monitor.set_threshold(threshold);
        self.monitor.set_trigger_cooldown(cooldown);

        if !self.monitor.start(&selector) {
            self.shared.log("Could not start sound detection");
            return false;
        }

        self.shared.trigger.clear();
        self.shared.halt.clear();
        self.shared.paused.store(false, Ordering::SeqCst);
        lock(&self.shared.stats).reset(Instant::now());
        self.shared.running.store(true, Ordering::SeqCst);

        let (done_tx, done_rx) = mpsc::channel();
        let shared = Arc::clone(&self.shared);
        let spawned = std::thread::Builder::new()
            .name("autocast-control".to_string())
            .spawn(move || run_loop(shared, done_tx));

        match spawned {
            Ok(handle) => {
                *lock(&self.worker) = Some(Worker {
                    handle,
                    done: done_rx,
                });
            }
            Err(e) => {
                error!(error = %e, "Failed to spawn control loop");
                self.shared.running.store(false, Ordering::SeqCst);
                self.monitor.stop();
                return false;
            }
        }

        info!(threshold, "Bot started");
        self.shared.log("Bot started");
        self.shared.update_stats(|_| {});
        true
    }

    /// Stop the loop and the monitor. Safe to call at any time.
    ///
    /// Wakes the worker wherever it is blocked and waits up to
    /// [`JOIN_TIMEOUT`] for it to finish, so no key is pressed afterwards.
    pub fn stop(&self) {
        let was_running = self.shared.running.swap(false, Ordering::SeqCst);
        self.shared.paused.store(false, Ordering::SeqCst);
        self.shared.halt.set();
        self.shared.trigger.set();

        self.monitor.stop();

        let worker = lock(&self.worker).take();
        if let Some(worker) = worker {
            match worker.done.recv_timeout(JOIN_TIMEOUT) {
                Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => {
                    let _ = worker.handle.join();
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    warn!("Control loop did not finish within {:?}", JOIN_TIMEOUT);
                    *lock(&self.worker) = Some(worker);
                }
            }
        }

        lock(&self.shared.stats).freeze(Instant::now());
        self.shared.set_state(FishingState::Idle);
        if was_running {
            self.shared.log("Bot stopped");
        }
    }

    /// Pause between steps. An action already under way completes first.
    pub fn pause(&self) {
        if self.is_running() && !self.shared.paused.swap(true, Ordering::SeqCst) {
            self.shared.set_state(FishingState::Paused);
            self.shared.log("Paused");
        }
    }

    pub fn resume(&self) {
        if self.is_running() && self.shared.paused.swap(false, Ordering::SeqCst) {
            self.shared.log("Resumed");
        }
    }

    pub fn toggle_pause(&self) {
        if self.is_paused() {
            self.resume();
        } else {
            self.pause();
        }
    }

    /// Measure ambient sound for `duration` and adopt it as the noise floor.
    ///
    /// Opens the monitor for the measurement if it was not already open, and
    /// closes it again afterwards unless the bot is running.
    pub fn calibrate_sound(&self, duration: Duration) -> f32 {
        let opened_here = !self.monitor.is_running();
        if opened_here {
            let device = lock(&self.shared.config).audio_device.clone();
            self.monitor
                .start(&DeviceSelector::from_config(device.as_deref()));
        }

        self.shared.log(&format!(
            "Calibrating sound for {:.1}s",
            duration.as_secs_f32()
        ));
        let noise_floor = self.monitor.calibrate(duration);
        self.shared
            .log(&format!("Calibration done, noise floor {:.4}", noise_floor));

        if opened_here && !self.is_running() {
            self.monitor.stop();
        }
        noise_floor
    }

    /// Swap the configuration. Applied to the loop at the next cycle; the
    /// trigger threshold and cooldown change immediately.
    pub fn set_config(&self, mut config: Config) {
        let threshold = config.update_threshold();
        self.monitor.set_threshold(threshold);
        self.monitor
            .set_trigger_cooldown(config.trigger_cooldown_duration());
        *lock(&self.shared.config) = config;
        debug!(threshold, "Config updated");
    }

    pub fn config(&self) -> Config {
        lock(&self.shared.config).clone()
    }

    pub fn state(&self) -> FishingState {
        self.shared.state()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::SeqCst)
    }

    pub fn monitor(&self) -> &SoundMonitor {
        &self.monitor
    }

    /// Turn key sending on or off. Off is a dry run: the cycle proceeds and
    /// counts, but nothing reaches the keyboard.
    pub fn set_keys_enabled(&self, enabled: bool) {
        lock(&self.shared.keys).set_enabled(enabled);
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        if self.is_running() {
            self.stop();
        }
    }
}

#[cfg(test)]
#[path = "controller_test.rs"]
mod tests;
