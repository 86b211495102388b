//! Error types for the stage workers.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from the capture stage.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// Capture command not found.
    #[error("Capture command not found: {command}")]
    CommandNotFound { command: String },

    /// Capture command ran but reported failure.
    #[error("Capture failed: {reason}")]
    CaptureFailed {
        reason: String,
        stderr: Option<String>,
    },

    /// Output directory could not be prepared or watched.
    #[error("Cannot watch capture directory {path}: {reason}")]
    WatchFailed { path: PathBuf, reason: String },

    /// I/O error while invoking the device.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the compose stage.
#[derive(Debug, Error)]
pub enum ComposeError {
    /// Source and overlay sizes differ.
    #[error("Invalid image dimensions! Expected {expected_width}x{expected_height} but got {width}x{height}")]
    DimensionMismatch {
        expected_width: u32,
        expected_height: u32,
        width: u32,
        height: u32,
    },

    /// Crop rectangle does not fit inside the capture.
    #[error("Crop {x},{y} {crop_width}x{crop_height} exceeds image {width}x{height}")]
    CropOutOfBounds {
        x: u32,
        y: u32,
        crop_width: u32,
        crop_height: u32,
        width: u32,
        height: u32,
    },

    /// Record reached compose without a source image.
    #[error("Record has no source image")]
    MissingSource,

    /// Overlay directory could not be prepared or watched.
    #[error("Cannot watch overlay directory {path}: {reason}")]
    WatchFailed { path: PathBuf, reason: String },

    /// Decoding or encoding failed.
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Blocking task panicked or was cancelled.
    #[error("Compose task failed: {0}")]
    Task(String),
}

/// Errors from the thumbnail stage.
#[derive(Debug, Error)]
pub enum ThumbnailError {
    #[error("Record has no source image")]
    MissingSource,

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Thumbnail task failed: {0}")]
    Task(String),
}

/// Errors from the post stage.
#[derive(Debug, Error)]
pub enum UploadError {
    /// Request exceeded the configured timeout.
    #[error("Upload timed out")]
    Timeout,

    /// Endpoint answered with a non-success status.
    #[error("Upload rejected with HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Response body did not carry an assigned id.
    #[error("Unexpected upload response: {0}")]
    InvalidResponse(String),

    /// Transport-level failure.
    #[error("HTTP error: {0}")]
    Http(String),

    /// Record reached post without a source image.
    #[error("Record has no source image")]
    MissingSource,

    /// Local file could not be read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for UploadError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            UploadError::Timeout
        } else {
            UploadError::Http(e.to_string())
        }
    }
}
