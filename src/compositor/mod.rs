//! Live compositor for the streaming path
//!
//! - `Compositor` assembles canvas-sized frames from the latest source images
//! - `CompositorRunner` ticks it at the configured frame rate and feeds the
//!   preview, the publisher and the recorder
//! - Frames that would not match the canvas become placeholder cards

pub mod canvas;
pub mod clock;
pub mod engine;
pub mod font;
pub mod layout;
pub mod placeholder;
pub mod publisher;
pub mod runner;

pub use canvas::{Canvas, Image, Rect, Size};
pub use clock::FrameClock;
pub use engine::{CompositeFrame, Compositor, CompositorConfig};
pub use layout::LayerKind;
pub use placeholder::PlaceholderKind;
pub use publisher::{BandwidthState, BitrateController, NullPublisher, PublishError, StreamPublisher};
pub use runner::{CompositorRunner, FeedSink, FeedSlot, RunnerHandle, RunnerStats};

use thiserror::Error;

/// Compositor errors
#[derive(Error, Debug)]
pub enum CompositorError {
    #[error("No frame has been composed yet")]
    NoFrame,

    #[error("PNG error: {0}")]
    Png(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type CompositorResult<T> = Result<T, CompositorError>;
