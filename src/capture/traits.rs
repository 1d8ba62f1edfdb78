//! Capture trait definitions
//!
//! Device descriptions handed from discovery to negotiation, and the
//! platform-agnostic traits a camera backend implements.

use super::error::CaptureResult;
use crate::media::PixelFormat;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Codec marker carried by formats that support the extended (log) color space
pub const EXTENDED_COLOR_MARKER: &str = "x420";

/// Video resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const HD_1080: Resolution = Resolution::new(1920, 1080);
    pub const UHD_4K: Resolution = Resolution::new(3840, 2160);

    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Where a camera sits on the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraPosition {
    Front,
    Back,
    External,
}

impl fmt::Display for CameraPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraPosition::Front => write!(f, "front"),
            CameraPosition::Back => write!(f, "back"),
            CameraPosition::External => write!(f, "external"),
        }
    }
}

/// Color space class of a capture format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ColorSpace {
    /// Rec. 709 / sRGB
    Standard,
    /// Wide gamut log encoding
    ExtendedLog,
}

impl fmt::Display for ColorSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColorSpace::Standard => write!(f, "standard"),
            ColorSpace::ExtendedLog => write!(f, "extended-log"),
        }
    }
}

/// One entry of a device's supported format list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceFormat {
    /// Pixel resolution of delivered frames
    pub resolution: Resolution,

    /// Highest frame rate the format sustains
    pub max_frame_rate: u32,

    /// Color spaces the format can deliver
    pub color_spaces: Vec<ColorSpace>,

    /// Media subtype marker (e.g. "420v", "x420")
    pub codec_marker: String,

    /// Layout of delivered frames
    pub pixel_format: PixelFormat,
}

impl DeviceFormat {
    pub fn supports_color_space(&self, color_space: ColorSpace) -> bool {
        self.color_spaces.contains(&color_space)
    }

    /// Whether the format carries the extended color space codec marker
    pub fn has_extended_marker(&self) -> bool {
        self.codec_marker == EXTENDED_COLOR_MARKER
    }
}

/// A physical capture endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceCandidate {
    /// Unique device ID
    pub id: String,

    /// Human readable name
    pub name: String,

    /// Position on the device
    pub position: CameraPosition,

    /// Supported formats, in the order the hardware reports them
    pub formats: Vec<DeviceFormat>,

    /// Maximum zoom factor
    pub max_zoom: f32,

    /// Whether the camera has a torch/flash
    pub has_torch: bool,

    /// Whether the camera keeps a stable color space across format changes
    pub supports_stable_color: bool,
}

/// Snapshot of a device's applied configuration
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceConfiguration {
    pub format: Option<DeviceFormat>,
    pub frame_rate: Option<u32>,
    pub color_space: ColorSpace,
}

/// Enumerates capture devices
///
/// Called fresh on every negotiation; results are never cached.
pub trait DeviceDiscovery: Send + Sync {
    /// Devices at `position`, in preference order
    fn enumerate(&self, position: CameraPosition) -> Vec<DeviceCandidate>;
}

/// Applies configuration to a device.
///
/// Calls may block on a hardware round-trip and belong on the
/// configuration queue only.
pub trait DeviceControl: Send + Sync {
    /// Acquire exclusive configuration access
    fn lock_for_configuration(&self, device_id: &str) -> CaptureResult<()>;

    /// Currently applied configuration
    fn active_configuration(&self, device_id: &str) -> CaptureResult<DeviceConfiguration>;

    /// Apply a format and frame rate. Requires the lock.
    fn set_active_format(
        &self,
        device_id: &str,
        format: &DeviceFormat,
        frame_rate: u32,
    ) -> CaptureResult<()>;

    /// Apply a color space. Requires the lock.
    fn set_color_space(&self, device_id: &str, color_space: ColorSpace) -> CaptureResult<()>;

    /// Restore a previously captured configuration. Requires the lock.
    fn restore_configuration(
        &self,
        device_id: &str,
        configuration: &DeviceConfiguration,
    ) -> CaptureResult<()>;

    /// Release configuration access
    fn unlock_for_configuration(&self, device_id: &str);
}
