//! Timestamped media samples
//!
//! A `MediaSample` is one unit of video (a frame) or audio (a block of
//! interleaved PCM) with its presentation timestamp and format.

use super::pool::PooledBuffer;
use super::time::MediaTime;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of media carried by a sample or track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Video => write!(f, "video"),
            MediaKind::Audio => write!(f, "audio"),
        }
    }
}

/// Pixel layout of a video frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// 8-bit BGRA, 4 bytes per pixel
    Bgra8,
    /// 8-bit RGBA, 4 bytes per pixel
    Rgba8,
    /// 8-bit 4:2:0 biplanar
    Nv12,
    /// 10-bit 4:2:0 biplanar in 16-bit words
    P010,
}

impl PixelFormat {
    /// Bytes needed for one tightly packed frame
    pub fn frame_len(&self, width: u32, height: u32) -> usize {
        let pixels = width as usize * height as usize;
        match self {
            PixelFormat::Bgra8 | PixelFormat::Rgba8 => pixels * 4,
            PixelFormat::Nv12 => pixels * 3 / 2,
            PixelFormat::P010 => pixels * 3,
        }
    }

    /// FFmpeg `-pix_fmt` name for raw input of this layout
    pub fn ffmpeg_name(&self) -> &'static str {
        match self {
            PixelFormat::Bgra8 => "bgra",
            PixelFormat::Rgba8 => "rgba",
            PixelFormat::Nv12 => "nv12",
            PixelFormat::P010 => "p010le",
        }
    }
}

/// Geometry and layout of video frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoFormat {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
}

impl VideoFormat {
    pub fn new(width: u32, height: u32, pixel_format: PixelFormat) -> Self {
        Self {
            width,
            height,
            pixel_format,
        }
    }

    pub fn frame_len(&self) -> usize {
        self.pixel_format.frame_len(self.width, self.height)
    }
}

/// Interleaved signed 16-bit little-endian PCM
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioFormat {
    pub const BYTES_PER_SAMPLE: usize = 2;

    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    /// Bytes per interleaved frame (one sample for every channel)
    pub fn bytes_per_frame(&self) -> usize {
        self.channels as usize * Self::BYTES_PER_SAMPLE
    }
}

/// Format of a sample's payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum FormatDescription {
    Video(VideoFormat),
    Audio(AudioFormat),
}

impl FormatDescription {
    pub fn kind(&self) -> MediaKind {
        match self {
            FormatDescription::Video(_) => MediaKind::Video,
            FormatDescription::Audio(_) => MediaKind::Audio,
        }
    }
}

/// One timestamped unit of captured media.
///
/// Samples are moved to exactly one consumer; dropping the sample returns its
/// payload to the pool it came from.
#[derive(Debug)]
pub struct MediaSample {
    /// Presentation timestamp on the media clock
    pub pts: MediaTime,

    /// Kind of media in the payload
    pub kind: MediaKind,

    /// Frame bytes or interleaved PCM bytes
    pub payload: PooledBuffer,

    /// Layout of the payload
    pub format: FormatDescription,
}

impl MediaSample {
    /// Create a video sample
    pub fn video(pts: MediaTime, payload: PooledBuffer, format: VideoFormat) -> Self {
        Self {
            pts,
            kind: MediaKind::Video,
            payload,
            format: FormatDescription::Video(format),
        }
    }

    /// Create an audio sample
    pub fn audio(pts: MediaTime, payload: PooledBuffer, format: AudioFormat) -> Self {
        Self {
            pts,
            kind: MediaKind::Audio,
            payload,
            format: FormatDescription::Audio(format),
        }
    }

    pub fn is_video(&self) -> bool {
        self.kind == MediaKind::Video
    }

    pub fn video_format(&self) -> Option<VideoFormat> {
        match self.format {
            FormatDescription::Video(format) => Some(format),
            FormatDescription::Audio(_) => None,
        }
    }

    pub fn audio_format(&self) -> Option<AudioFormat> {
        match self.format {
            FormatDescription::Audio(format) => Some(format),
            FormatDescription::Video(_) => None,
        }
    }

    /// Number of PCM frames in an audio sample (zero for video)
    pub fn audio_frame_count(&self) -> usize {
        self.audio_format()
            .map(|f| self.payload.len() / f.bytes_per_frame().max(1))
            .unwrap_or(0)
    }
}
