//! Media primitives shared by capture, recording and compositing
//!
//! - `MediaTime` for media-clock timestamps
//! - `MediaSample` and its format descriptors
//! - `BufferPool` for reusable payload buffers

pub mod pool;
pub mod sample;
pub mod time;

pub use pool::{BufferPool, PooledBuffer};
pub use sample::{AudioFormat, FormatDescription, MediaKind, MediaSample, PixelFormat, VideoFormat};
pub use time::{MediaTime, NANOS_TIMESCALE};
