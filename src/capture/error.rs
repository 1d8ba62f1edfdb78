//! Capture setup and runtime errors

use thiserror::Error;

/// Errors raised while negotiating, configuring or running a capture source
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("No camera available")]
    NoCameraAvailable,

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Could not lock device {device} for configuration: {reason}")]
    LockFailed { device: String, reason: String },

    #[error("Device {device} rejected format: {reason}")]
    FormatRejected { device: String, reason: String },

    #[error("Device {device} rejected color space: {reason}")]
    ColorSpaceRejected { device: String, reason: String },

    #[error("Could not attach {0} to the capture session")]
    CannotAttach(String),

    #[error("Source already running")]
    AlreadyRunning,

    #[error("Source not running")]
    NotRunning,

    #[error("Capture error: {0}")]
    Source(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for capture operations
pub type CaptureResult<T> = Result<T, CaptureError>;
