//! Take Recorder - camera capture to QuickTime takes.
//!
//! Negotiates a camera for a capture profile, streams its samples through a
//! serial recorder state machine into an ffmpeg-backed container writer, and
//! offers a live compositing path that records and publishes a fixed-size
//! canvas.

pub mod capture;
pub mod compositor;
pub mod config;
pub mod logging;
pub mod media;
pub mod recorder;
pub mod service;
pub mod utils;
pub mod writer;

pub use config::PipelineConfig;
pub use service::{CaptureService, DirectoryTakeNamer, StreamSession, TakeNamer};
pub use utils::{AppError, AppResult, ErrorResponse};
