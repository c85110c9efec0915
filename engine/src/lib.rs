//! Detection-and-timing core for autocast.
//!
//! [`controller::Controller`] runs the bait/cast/wait/hook loop, woken by a
//! [`monitor::SoundMonitor`] watching an audio input and acting through an
//! [`inject::KeystrokeEmitter`].

pub mod audio;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod inject;
pub mod monitor;
pub mod signal;
pub mod stats;

#[cfg(test)]
pub(crate) mod testing;

pub use config::Config;
pub use controller::{Controller, FishingState};
pub use error::{Error, Result};
pub use events::{BotEvent, BroadcastSink, EventSink};
pub use stats::StatsSnapshot;
