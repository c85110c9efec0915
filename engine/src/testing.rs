//! Test doubles for the keyboard, capture, and notification seams.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use enigo::Key;

use crate::audio::{BlockSink, CaptureBackend, CaptureStream, DeviceSelector};
use crate::controller::FishingState;
use crate::error::{Error, Result};
use crate::events::EventSink;
use crate::inject::KeyBackend;
use crate::stats::StatsSnapshot;

#[derive(Debug, Clone, PartialEq)]
pub enum KeyEvent {
    Press(Key),
    Release(Key),
}

/// Keyboard backend that records events instead of sending them.
#[derive(Clone, Default)]
pub struct RecordingKeys {
    events: Arc<Mutex<Vec<KeyEvent>>>,
    fail: bool,
}

impl RecordingKeys {
    /// A backend that refuses every event.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn events(&self) -> Vec<KeyEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Keys pressed so far, in order.
    pub fn pressed(&self) -> Vec<Key> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                KeyEvent::Press(key) => Some(key),
                KeyEvent::Release(_) => None,
            })
            .collect()
    }

    fn record(&self, event: KeyEvent) -> Result<()> {
        if self.fail {
            return Err(Error::Keyboard("refused".to_string()));
        }
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

impl KeyBackend for RecordingKeys {
    fn press(&mut self, key: Key) -> Result<()> {
        self.record(KeyEvent::Press(key))
    }

    fn release(&mut self, key: Key) -> Result<()> {
        self.record(KeyEvent::Release(key))
    }
}

/// Capture backend with no device behind it. Tests push blocks by hand.
#[derive(Clone, Default)]
pub struct FakeCapture {
    sink: Arc<Mutex<Option<Arc<dyn BlockSink>>>>,
    opened: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
}

impl FakeCapture {
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    /// Deliver one block to the open stream's sink, if any.
    pub fn feed(&self, block: &[f32]) {
        let sink = self.sink.lock().unwrap().clone();
        if let Some(sink) = sink {
            sink.on_block(block);
        }
    }

    /// Report a stream failure to the open stream's sink.
    pub fn fail(&self, message: &str) {
        let sink = self.sink.lock().unwrap().clone();
        if let Some(sink) = sink {
            sink.on_stream_error(message);
        }
    }
}

impl CaptureBackend for FakeCapture {
    fn open(
        &self,
        _selector: &DeviceSelector,
        sink: Arc<dyn BlockSink>,
    ) -> Result<Box<dyn CaptureStream>> {
        *self.sink.lock().unwrap() = Some(sink);
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeStream {
            owner: self.clone(),
        }))
    }
}

struct FakeStream {
    owner: FakeCapture,
}

impl CaptureStream for FakeStream {
    fn device_name(&self) -> &str {
        "fake input"
    }

    fn close(self: Box<Self>) {
        *self.owner.sink.lock().unwrap() = None;
        self.owner.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Capture backend for a machine without any input device.
pub struct NoDevice;

impl CaptureBackend for NoDevice {
    fn open(
        &self,
        _selector: &DeviceSelector,
        _sink: Arc<dyn BlockSink>,
    ) -> Result<Box<dyn CaptureStream>> {
        Err(Error::DeviceUnavailable("no input devices".to_string()))
    }
}

/// Event sink that keeps everything it is told.
#[derive(Default)]
pub struct RecordingSink {
    pub states: Mutex<Vec<FishingState>>,
    pub stats: Mutex<Vec<StatsSnapshot>>,
    pub logs: Mutex<Vec<String>>,
}

impl RecordingSink {
    pub fn states(&self) -> Vec<FishingState> {
        self.states.lock().unwrap().clone()
    }

    pub fn logs(&self) -> Vec<String> {
        self.logs.lock().unwrap().clone()
    }

    pub fn last_stats(&self) -> Option<StatsSnapshot> {
        self.stats.lock().unwrap().last().cloned()
    }
}

impl EventSink for RecordingSink {
    fn on_state(&self, state: FishingState) {
        self.states.lock().unwrap().push(state);
    }

    fn on_stats(&self, stats: &StatsSnapshot) {
        self.stats.lock().unwrap().push(stats.clone());
    }

    fn on_log(&self, message: &str) {
        self.logs.lock().unwrap().push(message.to_string());
    }
}
