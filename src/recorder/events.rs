//! Recorder event bus
//!
//! Events are published from the recorder's serial queue in the order the
//! machine produces them, so subscribers observe state changes in order.

use super::state::RecorderState;
use crate::media::MediaKind;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

const EVENT_CAPACITY: usize = 256;

/// Notifications emitted by the recorder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "event")]
pub enum RecordingEvent {
    /// The machine moved between states
    StateChanged {
        from: RecorderState,
        to: RecorderState,
    },
    /// The writer session started; samples are being written
    Started { session_id: Uuid },
    /// The session is over, whether or not a file was written
    Ended { session_id: Uuid },
    /// A frame was dropped at the source or by back-pressure
    DroppedFrame { kind: MediaKind },
    /// Session start failed and the machine returned to idle
    SessionFailed { session_id: Uuid, reason: String },
}

/// Typed fan-out of recorder events
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<RecordingEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RecordingEvent> {
        self.tx.subscribe()
    }

    /// Publish without waiting; events with no subscribers are discarded
    pub fn emit(&self, event: RecordingEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
