//! Network publishing seam
//!
//! The compositor hands every frame and audio block to a `StreamPublisher`.
//! Publishers report available bandwidth on a watch channel and the
//! `BitrateController` adjusts the video bitrate in response.

use crate::media::MediaSample;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::watch;

/// Publisher errors
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Publisher is not connected")]
    NotConnected,

    #[error("Publish failed: {0}")]
    Sink(String),
}

/// Bandwidth estimate reported by the publisher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum BandwidthState {
    #[default]
    Sufficient,
    Insufficient,
}

#[async_trait]
pub trait StreamPublisher: Send + Sync {
    /// Send one composite frame
    async fn publish_video(&self, sample: &MediaSample) -> Result<(), PublishError>;

    /// Send one audio block
    async fn publish_audio(&self, sample: &MediaSample) -> Result<(), PublishError>;

    /// Change the target video bitrate
    fn set_video_bitrate(&self, kbps: u32);

    /// Watch the bandwidth estimate
    fn bandwidth(&self) -> watch::Receiver<BandwidthState>;
}

/// Publisher that discards everything and counts what it was given
pub struct NullPublisher {
    video: AtomicU64,
    audio: AtomicU64,
    bitrate_kbps: AtomicU32,
    failing: AtomicBool,
    bandwidth: watch::Sender<BandwidthState>,
}

impl NullPublisher {
    pub fn new() -> Self {
        let (bandwidth, _) = watch::channel(BandwidthState::Sufficient);
        Self {
            video: AtomicU64::new(0),
            audio: AtomicU64::new(0),
            bitrate_kbps: AtomicU32::new(0),
            failing: AtomicBool::new(false),
            bandwidth,
        }
    }

    pub fn video_frames(&self) -> u64 {
        self.video.load(Ordering::SeqCst)
    }

    pub fn audio_blocks(&self) -> u64 {
        self.audio.load(Ordering::SeqCst)
    }

    /// Last bitrate requested, zero if never set
    pub fn video_bitrate(&self) -> u32 {
        self.bitrate_kbps.load(Ordering::SeqCst)
    }

    /// Report a new bandwidth estimate to watchers
    pub fn set_bandwidth(&self, state: BandwidthState) {
        self.bandwidth.send_replace(state);
    }

    /// Make every publish call fail
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), PublishError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PublishError::NotConnected);
        }
        Ok(())
    }
}

impl Default for NullPublisher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StreamPublisher for NullPublisher {
    async fn publish_video(&self, _sample: &MediaSample) -> Result<(), PublishError> {
        self.check()?;
        self.video.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn publish_audio(&self, _sample: &MediaSample) -> Result<(), PublishError> {
        self.check()?;
        self.audio.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn set_video_bitrate(&self, kbps: u32) {
        self.bitrate_kbps.store(kbps, Ordering::SeqCst);
    }

    fn bandwidth(&self) -> watch::Receiver<BandwidthState> {
        self.bandwidth.subscribe()
    }
}

/// Steps the video bitrate down on congestion and back up when it clears
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitrateController {
    min_kbps: u32,
    max_kbps: u32,
    current_kbps: u32,
}

impl BitrateController {
    /// Starts at `max_kbps`
    pub fn new(min_kbps: u32, max_kbps: u32) -> Self {
        let min_kbps = min_kbps.min(max_kbps);
        Self {
            min_kbps,
            max_kbps,
            current_kbps: max_kbps,
        }
    }

    pub fn current(&self) -> u32 {
        self.current_kbps
    }

    /// Apply one bandwidth reading. Returns the new bitrate if it changed.
    pub fn update(&mut self, state: BandwidthState) -> Option<u32> {
        let next = match state {
            BandwidthState::Insufficient => self.current_kbps - self.current_kbps / 4,
            BandwidthState::Sufficient => self.current_kbps + (self.current_kbps / 10).max(1),
        }
        .clamp(self.min_kbps, self.max_kbps);

        if next == self.current_kbps {
            return None;
        }
        self.current_kbps = next;
        Some(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{AudioFormat, MediaTime, PooledBuffer};

    #[test]
    fn test_bitrate_steps_and_clamps() {
        let mut controller = BitrateController::new(1000, 4000);
        assert_eq!(controller.current(), 4000);
        assert_eq!(controller.update(BandwidthState::Sufficient), None);

        assert_eq!(controller.update(BandwidthState::Insufficient), Some(3000));
        assert_eq!(controller.update(BandwidthState::Insufficient), Some(2250));
        for _ in 0..10 {
            controller.update(BandwidthState::Insufficient);
        }
        assert_eq!(controller.current(), 1000);

        assert_eq!(controller.update(BandwidthState::Sufficient), Some(1100));
    }

    #[tokio::test]
    async fn test_null_publisher_counts() {
        let publisher = NullPublisher::new();
        let sample = MediaSample::audio(
            MediaTime::ZERO,
            PooledBuffer::detached(vec![0; 8]),
            AudioFormat::new(48_000, 2),
        );
        publisher.publish_audio(&sample).await.unwrap();
        assert_eq!(publisher.audio_blocks(), 1);

        publisher.set_failing(true);
        assert!(publisher.publish_audio(&sample).await.is_err());
        assert_eq!(publisher.audio_blocks(), 1);

        let mut bandwidth = publisher.bandwidth();
        publisher.set_bandwidth(BandwidthState::Insufficient);
        assert!(bandwidth.has_changed().unwrap());
        assert_eq!(*bandwidth.borrow_and_update(), BandwidthState::Insufficient);
    }
}
