//! Forwarding of stored events to external sinks.
//!
//! Every event a subscriber stores is also handed, as a single JSON line, to
//! each registered forwarder. Sinks are fire-and-forget: a sink that fails
//! or disconnects never affects recording.

use std::io::Write;
use std::sync::{mpsc, Arc, Mutex};

use serde::{Deserialize, Serialize};

/// A stored event as seen by forwarders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardedEvent {
    pub subscriber: String,
    /// Row JSON, including `time` and `eid`.
    pub line: String,
}

/// Receives every stored event.
pub trait EventForwarder: Send + Sync {
    fn forward(&self, event: &ForwardedEvent);
}

/// Broadcast channel supporting multiple receivers.
#[derive(Debug, Default)]
pub struct ChannelForwarder {
    senders: Mutex<Vec<mpsc::Sender<ForwardedEvent>>>,
}

impl ChannelForwarder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to receive forwarded events.
    pub fn subscribe(&self) -> mpsc::Receiver<ForwardedEvent> {
        let (tx, rx) = mpsc::channel();
        let mut senders = self.senders.lock().unwrap_or_else(|p| p.into_inner());
        senders.push(tx);
        rx
    }
}

impl EventForwarder for ChannelForwarder {
    fn forward(&self, event: &ForwardedEvent) {
        let mut senders = self.senders.lock().unwrap_or_else(|p| p.into_inner());
        senders.retain(|sender| sender.send(event.clone()).is_ok());
    }
}

/// Writes each event's row JSON as one line.
pub struct JsonlForwarder<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonlForwarder<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner().unwrap_or_else(|p| p.into_inner())
    }
}

impl<W: Write + Send> EventForwarder for JsonlForwarder<W> {
    fn forward(&self, event: &ForwardedEvent) {
        if let Ok(mut writer) = self.writer.lock() {
            let _ = writeln!(writer, "{}", event.line);
        }
    }
}

/// Forwards events to several forwarders.
pub struct FanoutForwarder {
    forwarders: Vec<Arc<dyn EventForwarder>>,
}

impl FanoutForwarder {
    pub fn new(forwarders: Vec<Arc<dyn EventForwarder>>) -> Self {
        Self { forwarders }
    }
}

impl EventForwarder for FanoutForwarder {
    fn forward(&self, event: &ForwardedEvent) {
        for forwarder in &self.forwarders {
            forwarder.forward(event);
        }
    }
}
