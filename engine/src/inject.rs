//! Synthetic keystrokes for the game window.
//!
//! Resolves logical key names from the config into keys and presses them
//! into whatever has input focus, holding each key for a short randomized
//! interval so presses look human.

use std::sync::mpsc;
use std::time::Duration;

use enigo::{Direction, Enigo, Key, Keyboard, Settings};
use rand::Rng;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Shortest time a key is held down, in milliseconds.
pub const HOLD_MIN_MS: u64 = 50;

/// Longest time a key is held down, in milliseconds.
pub const HOLD_MAX_MS: u64 = 150;

/// Low-level keyboard access. Implemented over enigo for real input.
pub trait KeyBackend: Send {
    fn press(&mut self, key: Key) -> Result<()>;
    fn release(&mut self, key: Key) -> Result<()>;
}

type KeyRequest = (Key, Direction, mpsc::SyncSender<Result<()>>);

/// Keyboard backend that injects OS-level key events through enigo.
///
/// The enigo connection is not guaranteed to be `Send`, so it stays on a
/// thread of its own and events are handed to it one at a time.
pub struct EnigoBackend {
    requests: mpsc::Sender<KeyRequest>,
}

impl EnigoBackend {
    /// Connect to the platform input system.
    ///
    /// On macOS, this requires Accessibility permissions to be granted.
    pub fn new() -> Result<Self> {
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<()>>(1);
        let (requests, inbox) = mpsc::channel::<KeyRequest>();

        std::thread::Builder::new()
            .name("autocast-keys".to_string())
            .spawn(move || {
                let mut enigo = match Enigo::new(&Settings::default()) {
                    Ok(enigo) => {
                        let _ = ready_tx.send(Ok(()));
                        enigo
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(Error::Keyboard(format!(
                            "failed to initialize enigo: {}",
                            e
                        ))));
                        return;
                    }
                };

                // Ends when the backend is dropped
                for (key, direction, reply) in inbox {
                    let result = enigo
                        .key(key, direction)
                        .map_err(|e| Error::Keyboard(e.to_string()));
                    let _ = reply.send(result);
                }
            })
            .map_err(|e| Error::Keyboard(format!("failed to spawn key thread: {}", e)))?;

        ready_rx
            .recv()
            .map_err(|_| Error::Keyboard("key thread exited during setup".to_string()))??;

        Ok(Self { requests })
    }

    fn send(&self, key: Key, direction: Direction) -> Result<()> {
        let (reply_tx, reply_rx) = mpsc::sync_channel(1);
        self.requests
            .send((key, direction, reply_tx))
            .map_err(|_| Error::Keyboard("key thread is gone".to_string()))?;
        reply_rx
            .recv()
            .map_err(|_| Error::Keyboard("key thread is gone".to_string()))?
    }
}

impl KeyBackend for EnigoBackend {
    fn press(&mut self, key: Key) -> Result<()> {
        self.send(key, Direction::Press)
    }

    fn release(&mut self, key: Key) -> Result<()> {
        self.send(key, Direction::Release)
    }
}

/// Resolve a key name to a key.
///
/// Accepts a single printable character or one of the named keys (function
/// keys, arrows and navigation, modifiers, space/enter/tab/escape/...).
/// Matching is case-insensitive and ignores surrounding whitespace.
/// Combinations such as `ctrl+z` are not single keys and are rejected.
pub fn parse_key(name: &str) -> Result<Key> {
    let trimmed = name.trim();
    let lower = trimmed.to_lowercase();

    let key = match lower.as_str() {
        "space" => Key::Space,
        "enter" | "return" => Key::Return,
        "tab" => Key::Tab,
        "esc" | "escape" => Key::Escape,
        "backspace" => Key::Backspace,
        "delete" => Key::Delete,
        "up" => Key::UpArrow,
        "down" => Key::DownArrow,
        "left" => Key::LeftArrow,
        "right" => Key::RightArrow,
        "home" => Key::Home,
        "end" => Key::End,
        "pageup" => Key::PageUp,
        "pagedown" => Key::PageDown,
        "f1" => Key::F1,
        "f2" => Key::F2,
        "f3" => Key::F3,
        "f4" => Key::F4,
        "f5" => Key::F5,
        "f6" => Key::F6,
        "f7" => Key::F7,
        "f8" => Key::F8,
        "f9" => Key::F9,
        "f10" => Key::F10,
        "f11" => Key::F11,
        "f12" => Key::F12,
        "shift" => Key::Shift,
        "ctrl" | "control" => Key::Control,
        "alt" => Key::Alt,
        _ => {
            let mut chars = lower.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) if !c.is_control() && !c.is_whitespace() => Key::Unicode(c),
                _ => return Err(Error::UnknownKey(name.to_string())),
            }
        }
    };

    Ok(key)
}

/// Uniformly random delay in milliseconds, both bounds inclusive.
///
/// Bounds given in the wrong order are swapped rather than rejected.
pub fn random_delay(min_ms: u64, max_ms: u64) -> Duration {
    let (lo, hi) = if min_ms <= max_ms {
        (min_ms, max_ms)
    } else {
        (max_ms, min_ms)
    };
    Duration::from_millis(rand::thread_rng().gen_range(lo..=hi))
}

/// Sleep for a [`random_delay`].
pub fn sleep_random(min_ms: u64, max_ms: u64) {
    std::thread::sleep(random_delay(min_ms, max_ms));
}

/// Presses named keys with human-like hold times.
pub struct KeystrokeEmitter {
    backend: Box<dyn KeyBackend>,
    enabled: bool,
}

impl KeystrokeEmitter {
    /// Create an emitter that injects real OS key events.
    pub fn new() -> Result<Self> {
        Ok(Self::with_backend(Box::new(EnigoBackend::new()?)))
    }

    /// Create an emitter over any keyboard backend.
    pub fn with_backend(backend: Box<dyn KeyBackend>) -> Self {
        Self {
            backend,
            enabled: true,
        }
    }

    /// Enable or disable key sending. Disabled emitters press nothing.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Press and release a key, holding it for 50-150ms.
    ///
    /// Returns false when disabled or when the key could not be sent.
    pub fn press_key(&mut self, name: &str) -> bool {
        self.hold_for(name, random_delay(HOLD_MIN_MS, HOLD_MAX_MS))
    }

    /// Wait a random delay, then press the key.
    pub fn press_key_with_delay(&mut self, name: &str, min_ms: u64, max_ms: u64) -> bool {
        if max_ms > 0 {
            sleep_random(min_ms, max_ms);
        }
        self.press_key(name)
    }

    /// Hold a key down for an exact duration.
    pub fn hold_key(&mut self, name: &str, duration_ms: u64) -> bool {
        self.hold_for(name, Duration::from_millis(duration_ms))
    }

    fn hold_for(&mut self, name: &str, hold: Duration) -> bool {
        if !self.enabled {
            debug!(key = %name, "Key sending disabled, skipping");
            return false;
        }

        match self.try_hold(name, hold) {
            Ok(()) => true,
            Err(e) => {
                warn!(key = %name, error = %e, "Failed to send key");
                false
            }
        }
    }

    fn try_hold(&mut self, name: &str, hold: Duration) -> Result<()> {
        let key = parse_key(name)?;
        debug!(key = %name, hold_ms = hold.as_millis() as u64, "Pressing key");

        self.backend.press(key)?;
        std::thread::sleep(hold);
        self.backend.release(key)
    }
}

#[cfg(test)]
#[path = "inject_test.rs"]
mod tests;
