//! Notifications from the controller to whatever presents it.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::controller::FishingState;
use crate::stats::StatsSnapshot;

/// Capacity of the broadcast channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Receives controller notifications. Called from the control thread, so
/// implementations should not block for long.
pub trait EventSink: Send + Sync {
    fn on_state(&self, state: FishingState);
    fn on_stats(&self, stats: &StatsSnapshot);
    /// `message` is already timestamped.
    fn on_log(&self, message: &str);
}

/// A controller notification as a value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BotEvent {
    StateChanged { state: FishingState },
    StatsUpdated { stats: StatsSnapshot },
    Log { message: String },
}

/// Prefix a message with a local `[HH:MM:SS]` timestamp.
pub fn timestamped(message: &str) -> String {
    stamp_at(Local::now(), message)
}

pub fn stamp_at(at: DateTime<Local>, message: &str) -> String {
    format!("[{}] {}", at.format("%H:%M:%S"), message)
}

/// Fans notifications out over a tokio broadcast channel.
///
/// Lossy under backpressure: a subscriber more than
/// [`EVENT_CHANNEL_CAPACITY`] events behind loses the oldest ones and its
/// next `recv` reports how many with `RecvError::Lagged`. Order is kept for
/// everything it does receive. Implement [`EventSink`] directly when every
/// notification must arrive.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<BotEvent>,
}

impl BroadcastSink {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BotEvent> {
        self.tx.subscribe()
    }

    fn send(&self, event: BotEvent) {
        // No receivers is fine - nobody is listening yet
        if self.tx.send(event).is_err() {
            debug!("No event subscribers");
        }
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for BroadcastSink {
    fn on_state(&self, state: FishingState) {
        self.send(BotEvent::StateChanged { state });
    }

    fn on_stats(&self, stats: &StatsSnapshot) {
        self.send(BotEvent::StatsUpdated {
            stats: stats.clone(),
        });
    }

    fn on_log(&self, message: &str) {
        self.send(BotEvent::Log {
            message: message.to_string(),
        });
    }
}
