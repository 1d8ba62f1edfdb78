//! Error types and handling
//!
//! `AppError` gathers the per-module errors at the composition root.

use crate::capture::CaptureError;
use crate::compositor::{CompositorError, PublishError};
use crate::recorder::RecordingError;
use crate::writer::WriterError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Writer error: {0}")]
    Writer(#[from] WriterError),

    #[error("Recording error: {0}")]
    Recording(#[from] RecordingError),

    #[error("Compositor error: {0}")]
    Compositor(#[from] CompositorError),

    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),

    #[error("Capture is not running")]
    NotCapturing,

    #[error("Task failed: {0}")]
    Task(String),
}

/// Error response for outer surfaces
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<AppError> for ErrorResponse {
    fn from(error: AppError) -> Self {
        let code = match &error {
            AppError::Io(_) => "IO_ERROR",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            AppError::Capture(_) => "CAPTURE_ERROR",
            AppError::Writer(_) => "WRITER_ERROR",
            AppError::Recording(RecordingError::AlreadyRecording) => "ALREADY_RECORDING",
            AppError::Recording(_) => "RECORDING_ERROR",
            AppError::Compositor(_) => "COMPOSITOR_ERROR",
            AppError::Publish(_) => "PUBLISH_ERROR",
            AppError::NotCapturing => "NOT_CAPTURING",
            AppError::Task(_) => "TASK_ERROR",
        };

        ErrorResponse {
            code: code.to_string(),
            message: error.to_string(),
        }
    }
}

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let response = ErrorResponse::from(AppError::from(RecordingError::AlreadyRecording));
        assert_eq!(response.code, "ALREADY_RECORDING");
        assert_eq!(response.message, "Recording error: Recording already in progress");

        let response = ErrorResponse::from(AppError::NotCapturing);
        assert_eq!(response.code, "NOT_CAPTURING");
    }
}
