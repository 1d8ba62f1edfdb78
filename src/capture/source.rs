//! Sample delivery interfaces
//!
//! A `SampleSource` pushes timestamped samples into a `SampleSink` from its
//! own callback thread. Per-track order is non-decreasing by timestamp;
//! audio and video are not ordered relative to each other.

use super::error::CaptureResult;
use crate::media::{MediaKind, MediaSample, MediaTime};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Why a frame never reached its consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DropReason {
    /// Capture delivered too late and the frame was discarded
    LateDelivery,
    /// A downstream track input was not ready for more data
    BackPressure,
    /// No buffer was available to hold the frame
    OutOfBuffers,
}

/// A dropped frame report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DroppedFrame {
    pub kind: MediaKind,
    pub pts: MediaTime,
    pub reason: DropReason,
}

/// Receives samples on the source's callback thread
pub trait SampleSink: Send + Sync {
    /// Consume one sample. Must not block.
    fn on_sample(&self, sample: MediaSample);

    /// A frame was dropped before delivery
    fn on_dropped_frame(&self, dropped: DroppedFrame);
}

/// A running producer of samples
pub trait SampleSource: Send {
    /// Start delivering samples to `sink`
    fn start(&mut self, sink: Arc<dyn SampleSink>) -> CaptureResult<()>;

    /// Stop delivery and release the device
    fn stop(&mut self) -> CaptureResult<()>;

    /// Whether samples are currently being delivered
    fn is_running(&self) -> bool;
}

/// Forwards samples to a primary sink and drop reports to every sink
pub struct FanOutSink {
    primary: Arc<dyn SampleSink>,
    observers: Vec<Arc<dyn SampleSink>>,
}

impl FanOutSink {
    pub fn new(primary: Arc<dyn SampleSink>) -> Self {
        Self {
            primary,
            observers: Vec::new(),
        }
    }

    /// Add a sink that only sees drop reports
    pub fn observe(mut self, observer: Arc<dyn SampleSink>) -> Self {
        self.observers.push(observer);
        self
    }
}

impl SampleSink for FanOutSink {
    fn on_sample(&self, sample: MediaSample) {
        self.primary.on_sample(sample);
    }

    fn on_dropped_frame(&self, dropped: DroppedFrame) {
        self.primary.on_dropped_frame(dropped);
        for observer in &self.observers {
            observer.on_dropped_frame(dropped);
        }
    }
}

/// Opens sample sources for negotiated devices
pub trait SourceProvider: Send + Sync {
    /// Open (but do not start) a source for the configured device
    fn open_source(
        &self,
        negotiated: &super::negotiator::NegotiatedDevice,
        profile: &super::profile::CaptureProfile,
    ) -> CaptureResult<Box<dyn SampleSource>>;
}
