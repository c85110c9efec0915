//! Error kinds raised inside the engine.
//!
//! None of these cross the public behavioral boundary of the controller:
//! `start()` and `press_key()` fold them into a `bool` and the control loop
//! logs whatever an iteration returns before backing off.

use thiserror::Error;

/// Failures the engine knows how to degrade from.
#[derive(Debug, Error)]
pub enum Error {
    /// No audio input could be resolved for the requested selector.
    #[error("no audio input device available: {0}")]
    DeviceUnavailable(String),

    /// The audio subsystem failed while opening or running a stream.
    #[error("audio stream error: {0}")]
    Stream(String),

    /// A key name that does not map to a single key.
    #[error("unknown key: {0:?}")]
    UnknownKey(String),

    /// The keyboard backend could not be created or rejected an event.
    #[error("keyboard backend error: {0}")]
    Keyboard(String),

    /// Configuration values the control loop cannot act on.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result alias for engine operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;
