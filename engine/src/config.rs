//! Configuration management for autocast.
//!
//! Handles loading, saving, and providing defaults for the bot configuration.
//! The file is a single flat JSON object whose keys match the field names
//! below; internal bookkeeping (the file the config came from) is never
//! written back.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Error;

/// Threshold used at sensitivity 0 (least sensitive).
pub const MAX_THRESHOLD: f32 = 0.1;

/// Threshold used at sensitivity 100 (most sensitive).
pub const MIN_THRESHOLD: f32 = 0.005;

/// Longest accepted bite timeout, in seconds.
pub const MAX_TIMEOUT_SECS: u64 = 3600;

/// Longest accepted hook or cast delay, in milliseconds.
pub const MAX_DELAY_MS: u64 = 60_000;

/// File name of the persisted configuration.
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Bot configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Key that applies bait (the pre-action).
    pub pre_action_key: String,
    /// Key that casts the line.
    pub fishing_key: String,
    /// Key that reels the catch in.
    pub interact_key: String,
    /// Seconds between bait applications.
    pub bait_interval: u64,
    /// Seconds to wait for a bite before re-casting.
    pub timeout: u64,
    /// Minimum delay in ms between detecting a bite and pressing interact.
    pub hook_delay_min: u64,
    /// Maximum delay in ms between detecting a bite and pressing interact.
    pub hook_delay_max: u64,
    /// Minimum delay in ms after hooking before the next cycle.
    pub cast_delay_min: u64,
    /// Maximum delay in ms after hooking before the next cycle.
    pub cast_delay_max: u64,
    /// RMS level (0..1) the audio must exceed, on top of the noise floor.
    pub sound_threshold: f32,
    /// User-facing sensitivity (0..100) that `sound_threshold` is derived from.
    pub sound_sensitivity: u8,
    /// Minimum seconds between two triggers.
    pub trigger_cooldown: f64,
    /// Input device selector: an index, a name fragment, or unset for auto.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_device: Option<String>,
    /// Log verbosity.
    pub log_level: LogLevel,
    /// Where this config was loaded from. Never serialized.
    #[serde(skip)]
    pub(crate) path: Option<PathBuf>,
}

/// Log verbosity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Convert to a tracing filter directive covering every autocast crate.
    pub fn as_directive(&self) -> &'static str {
        match self {
            LogLevel::Error => "autocast=error",
            LogLevel::Warn => "autocast=warn",
            LogLevel::Info => "autocast=info",
            LogLevel::Debug => "autocast=debug",
            LogLevel::Trace => "autocast=trace",
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pre_action_key: "1".to_string(),
            fishing_key: "2".to_string(),
            interact_key: "f".to_string(),
            bait_interval: 900,
            timeout: 20,
            hook_delay_min: 200,
            hook_delay_max: 600,
            cast_delay_min: 500,
            cast_delay_max: 1500,
            sound_threshold: 0.02,
            sound_sensitivity: 50,
            trigger_cooldown: 1.0,
            audio_device: None,
            log_level: LogLevel::Info,
            path: None,
        }
    }
}

/// Map a sensitivity (0..100) onto a trigger threshold.
///
/// Linear from [`MAX_THRESHOLD`] at 0 down to [`MIN_THRESHOLD`] at 100.
/// Values above 100 are treated as 100.
pub fn threshold_for_sensitivity(sensitivity: u8) -> f32 {
    let fraction = f32::from(sensitivity.min(100)) / 100.0;
    MAX_THRESHOLD - fraction * (MAX_THRESHOLD - MIN_THRESHOLD)
}

impl Config {
    /// Returns the default config file path.
    /// `~/.config/autocast/config.json` (or `$XDG_CONFIG_HOME/autocast/`)
    pub fn config_path() -> Result<PathBuf> {
        autocast_common::dirs::config_dir().map(|p| p.join(CONFIG_FILE_NAME))
    }

    /// Load configuration from the default path.
    /// Returns defaults if the file doesn't exist.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    /// Returns defaults if the file doesn't exist.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            let mut config = Self::default();
            config.path = Some(path.to_path_buf());
            return Ok(config);
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut config = Self::parse(&content)?;
        config.path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Parse configuration from a JSON string.
    pub fn parse(content: &str) -> Result<Self> {
        serde_json::from_str(content).context("Failed to parse config file as JSON")
    }

    /// Save configuration to the path it was loaded from, or the default path.
    pub fn save(&self) -> Result<()> {
        let path = match &self.path {
            Some(path) => path.clone(),
            None => Self::config_path()?,
        };
        self.save_to(&path)
    }

    /// Save configuration to a specific path.
    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let content =
            serde_json::to_string_pretty(self).context("Failed to serialize config to JSON")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// The file this config was loaded from, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Recompute `sound_threshold` from `sound_sensitivity` and return it.
    pub fn update_threshold(&mut self) -> f32 {
        self.sound_threshold = threshold_for_sensitivity(self.sound_sensitivity);
        self.sound_threshold
    }

    /// Hook delay range in milliseconds.
    pub fn hook_delay_range(&self) -> (u64, u64) {
        (self.hook_delay_min, self.hook_delay_max)
    }

    /// Post-hook delay range in milliseconds.
    pub fn cast_delay_range(&self) -> (u64, u64) {
        (self.cast_delay_min, self.cast_delay_max)
    }

    pub fn bait_interval_duration(&self) -> Duration {
        Duration::from_secs(self.bait_interval)
    }

    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    /// Trigger cooldown, falling back to one second for unusable values.
    pub fn trigger_cooldown_duration(&self) -> Duration {
        Duration::try_from_secs_f64(self.trigger_cooldown).unwrap_or(Duration::from_secs(1))
    }

    /// Reject values the control loop cannot act on.
    pub fn validate(&self) -> Result<(), Error> {
        if self.hook_delay_min > self.hook_delay_max {
            return Err(Error::InvalidConfig(format!(
                "hook delay range is inverted ({} > {})",
                self.hook_delay_min, self.hook_delay_max
            )));
        }
        if self.cast_delay_min > self.cast_delay_max {
            return Err(Error::InvalidConfig(format!(
                "cast delay range is inverted ({} > {})",
                self.cast_delay_min, self.cast_delay_max
            )));
        }
        if self.hook_delay_max > MAX_DELAY_MS || self.cast_delay_max > MAX_DELAY_MS {
            return Err(Error::InvalidConfig(format!(
                "hook and cast delays must not exceed {} ms",
                MAX_DELAY_MS
            )));
        }
        if self.timeout == 0 || self.timeout > MAX_TIMEOUT_SECS {
            return Err(Error::InvalidConfig(format!(
                "timeout must be between 1 and {} seconds, got {}",
                MAX_TIMEOUT_SECS, self.timeout
            )));
        }
        if !self.trigger_cooldown.is_finite() || self.trigger_cooldown < 0.0 {
            return Err(Error::InvalidConfig(format!(
                "trigger cooldown must be a non-negative number of seconds, got {}",
                self.trigger_cooldown
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
