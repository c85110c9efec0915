//! Run statistics.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Counters for one run. Reset on start, frozen on stop.
#[derive(Debug, Clone, Default)]
pub struct Stats {
    pub total_casts: u64,
    pub successful_hooks: u64,
    pub timeouts: u64,
    pub baits_applied: u64,
    started_at: Option<Instant>,
    stopped_at: Option<Instant>,
}

impl Stats {
    /// Zero all counters and start the clock.
    pub fn reset(&mut self, now: Instant) {
        *self = Self {
            started_at: Some(now),
            ..Self::default()
        };
    }

    /// Stop the clock; `running_time` no longer advances.
    pub fn freeze(&mut self, now: Instant) {
        if self.started_at.is_some() && self.stopped_at.is_none() {
            self.stopped_at = Some(now);
        }
    }

    /// Hooks as a percentage of casts, 0 when nothing was cast.
    pub fn success_rate(&self) -> f64 {
        if self.total_casts == 0 {
            return 0.0;
        }
        (self.successful_hooks as f64 / self.total_casts as f64 * 100.0).min(100.0)
    }

    /// Time since start, up to the stop if stopped. Zero if never started.
    pub fn running_time(&self, now: Instant) -> Duration {
        match self.started_at {
            Some(started) => self
                .stopped_at
                .unwrap_or(now)
                .saturating_duration_since(started),
            None => Duration::ZERO,
        }
    }

    pub fn snapshot(&self, now: Instant) -> StatsSnapshot {
        StatsSnapshot {
            total_casts: self.total_casts,
            successful_hooks: self.successful_hooks,
            timeouts: self.timeouts,
            baits_applied: self.baits_applied,
            success_rate: self.success_rate(),
            running_secs: self.running_time(now).as_secs(),
        }
    }
}

/// Point-in-time copy of [`Stats`] handed to observers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub total_casts: u64,
    pub successful_hooks: u64,
    pub timeouts: u64,
    pub baits_applied: u64,
    /// Percent, in `[0, 100]`.
    pub success_rate: f64,
    pub running_secs: u64,
}

impl StatsSnapshot {
    /// Running time as `HH:MM:SS`.
    pub fn running_time_display(&self) -> String {
        let secs = self.running_secs;
        format!("{:02}:{:02}:{:02}", secs / 3600, secs / 60 % 60, secs % 60)
    }
}
