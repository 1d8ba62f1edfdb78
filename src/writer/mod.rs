//! Container writer
//!
//! Multiplexes timestamped video frames and audio blocks into a playable
//! movie file. The recorder drives a `ContainerWriter` exclusively from its
//! serial queue; startup and finalize are asynchronous.

pub mod adaptor;
pub mod ffmpeg;
pub mod settings;

pub use adaptor::{conform_audio, PixelBufferAdaptor};
pub use ffmpeg::{FfmpegOptions, FfmpegWriter, FfmpegWriterFactory};
pub use settings::{
    AudioTrackSettings, ChannelLayout, OutputSettings, VideoCodec, VideoTrackSettings,
    DEFAULT_AUDIO_BITRATE_KBPS, OUTPUT_SAMPLE_RATE,
};

use crate::media::{MediaKind, MediaSample, MediaTime, PooledBuffer};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Writer errors
#[derive(Error, Debug)]
pub enum WriterError {
    #[error("Cannot create writer: {0}")]
    CannotCreate(String),

    #[error("Cannot add {kind} input: {reason}")]
    CannotAddInput { kind: MediaKind, reason: String },

    #[error("Writer is {status:?}, cannot {operation}")]
    InvalidState {
        status: WriterStatus,
        operation: &'static str,
    },

    #[error("{0} input is not ready for more data")]
    NotReady(MediaKind),

    #[error("Frame mismatch: expected {expected}, got {actual}")]
    FrameMismatch { expected: String, actual: String },

    #[error("FFmpeg error: {0}")]
    Ffmpeg(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type WriterResult<T> = Result<T, WriterError>;

/// Lifecycle of a container writer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WriterStatus {
    /// Created, inputs may still be added
    Unknown,
    /// `start_writing` called, not ready yet
    Starting,
    /// Ready to accept a session and samples
    Writing,
    Completed,
    Failed,
    Cancelled,
}

/// Metadata attached to the container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type", content = "value")]
pub enum MetadataItem {
    /// ISO 6709 location string
    Location(String),
    /// RFC 3339 capture date
    CreationDate(String),
}

/// Result of finalizing a writer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishOutcome {
    pub path: PathBuf,
    /// Frames in the finished file, gap fill included
    pub video_frames: u64,
    pub audio_frames: u64,
    /// Set when finalize failed; the file may be incomplete or missing
    pub error: Option<String>,
}

/// Completion callback for `finish_writing`, run on a writer-owned thread
pub type FinishCallback = Box<dyn FnOnce(FinishOutcome) + Send + 'static>;

/// A movie file writer with one video and at most one audio input
pub trait ContainerWriter: Send {
    /// Final output location
    fn output_path(&self) -> &Path;

    /// Add the video track input. Only valid before `start_writing`.
    fn add_video_input(&mut self, settings: &VideoTrackSettings) -> WriterResult<()>;

    /// Add the audio track input. Only valid before `start_writing`.
    fn add_audio_input(&mut self, settings: &AudioTrackSettings) -> WriterResult<()>;

    /// Begin asynchronous startup; poll `status` for `Writing`
    fn start_writing(&mut self) -> WriterResult<()>;

    fn status(&self) -> WriterStatus;

    /// Start the timeline at `at`; earlier media is trimmed
    fn start_session(&mut self, at: MediaTime) -> WriterResult<()>;

    fn add_metadata(&mut self, item: MetadataItem);

    /// Whether the given input can take another sample without blocking
    fn is_ready_for_more(&self, kind: MediaKind) -> bool;

    /// Append one frame in the video input's pixel layout
    fn append_video(&mut self, frame: PooledBuffer, pts: MediaTime) -> WriterResult<()>;

    /// Append one block of interleaved PCM
    fn append_audio(&mut self, sample: MediaSample) -> WriterResult<()>;

    /// No more samples will be appended to this input
    fn mark_finished(&mut self, kind: MediaKind);

    /// Finalize asynchronously; `on_complete` runs exactly once
    fn finish_writing(&mut self, on_complete: FinishCallback);

    /// Abort, removing anything written so far
    fn cancel_writing(&mut self);
}

/// Creates writers for new takes
pub trait WriterFactory: Send + Sync {
    fn create(&self, path: &Path, settings: &OutputSettings) -> WriterResult<Box<dyn ContainerWriter>>;
}
