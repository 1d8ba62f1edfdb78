//! Recording state management
//!
//! Defines the recorder states, per-take session bookkeeping and the
//! summary produced when a take finishes.

use crate::capture::{CaptureProfile, Transform};
use crate::media::{MediaTime, VideoFormat};
use crate::writer::{ChannelLayout, ContainerWriter, PixelBufferAdaptor};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

/// Lead used for on-device recording
pub const DEVICE_LEAD_TIME: Duration = Duration::from_secs(1);

/// Lead used by the compositor path
pub const STREAMING_LEAD_TIME: Duration = Duration::from_secs(5);

/// Current state of the recorder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum RecorderState {
    /// No session
    #[default]
    Idle,
    /// Begin accepted, waiting for the first video sample
    Starting,
    /// Writer starting up, waiting for the aligned start
    WaitingForAlignedStart,
    /// Samples are being written
    Capturing,
    /// Finalizing the writer
    Ending,
}

impl RecorderState {
    /// Whether a session exists in this state
    pub fn is_active(&self) -> bool {
        *self != RecorderState::Idle
    }
}

impl fmt::Display for RecorderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RecorderState::Idle => "idle",
            RecorderState::Starting => "starting",
            RecorderState::WaitingForAlignedStart => "waiting-for-aligned-start",
            RecorderState::Capturing => "capturing",
            RecorderState::Ending => "ending",
        };
        f.write_str(name)
    }
}

/// Recorder tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecorderConfig {
    /// Added to the first video timestamp to get the aligned start
    pub lead_time: Duration,
}

impl RecorderConfig {
    pub fn device() -> Self {
        Self {
            lead_time: DEVICE_LEAD_TIME,
        }
    }

    pub fn streaming() -> Self {
        Self {
            lead_time: STREAMING_LEAD_TIME,
        }
    }

    pub fn with_lead_time(lead_time: Duration) -> Self {
        Self { lead_time }
    }
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self::device()
    }
}

/// Per-session sample accounting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCounters {
    /// Video frames handed to the writer
    pub video_frames: u64,
    /// PCM frames handed to the writer
    pub audio_frames: u64,
    /// Video frames dropped by back-pressure or append errors
    pub dropped_video: u64,
    /// Audio blocks dropped by back-pressure
    pub dropped_audio: u64,
    /// Drops reported by the source
    pub source_drops: u64,
    /// Samples discarded before the aligned start
    pub discarded_before_start: u64,
}

/// One recording in progress
pub struct RecordingSession {
    pub id: Uuid,
    pub output_path: PathBuf,
    pub profile: CaptureProfile,

    /// Wall-clock time Begin was accepted, for metadata only
    pub started_at: DateTime<Utc>,

    /// Timestamp of the first video sample after Begin
    pub first_sample_pts: Option<MediaTime>,

    /// `first_sample_pts + lead`
    pub aligned_start: Option<MediaTime>,

    /// Last video timestamp handed to the writer
    pub last_video_pts: Option<MediaTime>,

    /// Captured once when the writer is created
    pub transform: Option<Transform>,

    pub video_format: Option<VideoFormat>,
    pub writer: Option<Box<dyn ContainerWriter>>,
    pub adaptor: Option<PixelBufferAdaptor>,
    pub audio_layout: Option<ChannelLayout>,
    pub counters: SessionCounters,
}

impl RecordingSession {
    pub fn new(output_path: PathBuf, profile: CaptureProfile) -> Self {
        Self {
            id: Uuid::new_v4(),
            output_path,
            profile,
            started_at: Utc::now(),
            first_sample_pts: None,
            aligned_start: None,
            last_video_pts: None,
            transform: None,
            video_format: None,
            writer: None,
            adaptor: None,
            audio_layout: None,
            counters: SessionCounters::default(),
        }
    }

    /// Seconds of video written, counting the last frame's duration
    pub fn written_duration(&self) -> f64 {
        match (self.aligned_start, self.last_video_pts) {
            (Some(start), Some(last)) => {
                last.seconds_since(start).max(0.0) + self.profile.frame_rate.frame_seconds()
            }
            _ => 0.0,
        }
    }
}

impl fmt::Debug for RecordingSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordingSession")
            .field("id", &self.id)
            .field("output_path", &self.output_path)
            .field("aligned_start", &self.aligned_start)
            .field("has_writer", &self.writer.is_some())
            .field("counters", &self.counters)
            .finish()
    }
}

/// Summary of a finished take
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingOutput {
    pub session_id: Uuid,
    pub path: PathBuf,
    pub aligned_start_seconds: f64,
    pub duration_seconds: f64,
    /// Frames the writer put in the file; frames appended when finalize failed
    pub video_frames: u64,
    pub audio_samples_written: u64,
    pub dropped_frames: u64,
    pub started_at: DateTime<Utc>,
    /// Set when finalize reported an error; the file may be incomplete
    pub finalize_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{FrameRate, Resolution};

    #[test]
    fn test_lead_times() {
        assert_eq!(RecorderConfig::device().lead_time, Duration::from_secs(1));
        assert_eq!(RecorderConfig::streaming().lead_time, Duration::from_secs(5));
        assert_eq!(RecorderConfig::default(), RecorderConfig::device());
    }

    #[test]
    fn test_written_duration_includes_last_frame() {
        let profile = CaptureProfile::new("t", Resolution::HD_1080, FrameRate::Fps25);
        let mut session = RecordingSession::new(PathBuf::from("t.mov"), profile);
        assert_eq!(session.written_duration(), 0.0);

        session.aligned_start = Some(MediaTime::new(100, 25));
        session.last_video_pts = Some(MediaTime::new(149, 25));
        assert!((session.written_duration() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_state_serializes_camel_case() {
        let json = serde_json::to_string(&RecorderState::WaitingForAlignedStart).unwrap();
        assert_eq!(json, "\"waitingForAlignedStart\"");
        assert!(!RecorderState::Idle.is_active());
        assert!(RecorderState::Ending.is_active());
    }
}
