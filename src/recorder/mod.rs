//! Recording system module
//!
//! - `RecorderStateMachine` turns samples into a take on disk
//! - `RecordingCoordinator` runs the machine on its serial queue
//! - `RecordingEvent`s report progress to the UI and post-processing

pub mod coordinator;
pub mod events;
pub mod location;
pub mod machine;
pub mod postprocess;
pub mod state;

pub use coordinator::{RecorderSink, RecordingCoordinator};
pub use events::{EventBus, RecordingEvent};
pub use location::{FixedLocation, GeoLocation, LocationProvider};
pub use machine::{RecorderDeps, RecorderStateMachine, SharedStatus};
pub use postprocess::{FfmpegThumbnailer, PostProcessor};
pub use state::{RecorderConfig, RecorderState, RecordingOutput, RecordingSession, SessionCounters};

use crate::capture::{CaptureProfile, DroppedFrame};
use crate::media::MediaSample;
use crate::writer::FinishOutcome;
use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

/// Recorder request errors
#[derive(Error, Debug)]
pub enum RecordingError {
    #[error("Recording already in progress")]
    AlreadyRecording,

    #[error("Recorder queue is closed")]
    QueueClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type RecordingResult<T> = Result<T, RecordingError>;

/// Everything needed to start a take
#[derive(Debug, Clone)]
pub struct BeginRequest {
    pub output_path: PathBuf,
    pub profile: CaptureProfile,
}

/// Work items for the recorder's serial queue
#[derive(Debug)]
pub enum RecorderCommand {
    Begin(BeginRequest),
    End,
    Sample(MediaSample),
    DroppedFrame(DroppedFrame),
    /// Posted by the writer's finalize callback
    WriterFinished { session_id: Uuid, outcome: FinishOutcome },
    /// Finish any take, then stop the queue
    Shutdown,
}
