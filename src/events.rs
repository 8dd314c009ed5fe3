//! Event stream published by the alignment worker
//!
//! Any number of subscribers (a GUI, the CLI, tests) receive status text,
//! preview frames and results. Subscribers never touch worker state; they
//! talk back only through worker commands.

use crate::errors::SessionContext;
use crate::results::ResultRecord;
use crate::types::DetectedFeature;
use image::RgbImage;
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Buffered events per subscriber before slow receivers start lagging.
pub const EVENT_CAPACITY: usize = 256;

/// A frame ready for display, with overlays already drawn.
#[derive(Debug, Clone)]
pub struct PreviewFrame {
    pub sequence: u64,
    pub timestamp_us: u64,
    pub image: RgbImage,
    pub feature: Option<DetectedFeature>,
    /// `U/V/R` readout of the detected feature, if exactly one was found.
    pub readout: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AlignmentEvent {
    /// Persistent status line, e.g. "Calibrating T0, cycle: 1/3".
    Status(String),
    /// Transient advisory text.
    Message(String),
    Frame(Arc<PreviewFrame>),
    Result(ResultRecord),
    SessionComplete {
        session_id: Uuid,
        results: Vec<ResultRecord>,
    },
    DetectionError(String),
    /// Fatal error; published once per aborted session.
    SessionAborted {
        session_id: Uuid,
        context: SessionContext,
        message: String,
    },
}

/// Fan-out publisher for [`AlignmentEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<AlignmentEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AlignmentEvent> {
        self.sender.subscribe()
    }

    /// Publish to whoever is listening. Having no subscribers is fine.
    pub fn publish(&self, event: AlignmentEvent) {
        let _ = self.sender.send(event);
    }

    pub fn status(&self, text: impl Into<String>) {
        let text = text.into();
        log::info!("{}", text);
        self.publish(AlignmentEvent::Status(text));
    }

    pub fn message(&self, text: impl Into<String>) {
        self.publish(AlignmentEvent::Message(text.into()));
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
