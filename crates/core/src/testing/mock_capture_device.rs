//! Mock capture device for testing.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::stages::{CaptureDevice, CaptureError};

#[derive(Debug, Clone, Copy)]
enum Behavior {
    /// Report the path, write nothing.
    Record,
    /// Write a solid gray JPEG of this size.
    Write { width: u32, height: u32 },
    /// Write to a temporary name, then rename onto the requested path.
    WriteThenRename,
    /// Fail every trigger.
    Fail,
}

/// Mock implementation of the CaptureDevice trait.
///
/// Every triggered output path is sent to the receiver returned by the
/// constructor, so tests can learn the correlation id the stage picked.
#[derive(Debug, Clone)]
pub struct MockCaptureDevice {
    behavior: Behavior,
    triggered: Option<mpsc::UnboundedSender<PathBuf>>,
}

impl MockCaptureDevice {
    /// A device that only reports where it was asked to write.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PathBuf>) {
        Self::with_behavior(Behavior::Record)
    }

    /// A device that writes a small JPEG to the requested path.
    pub fn writing() -> (Self, mpsc::UnboundedReceiver<PathBuf>) {
        Self::writing_image(8, 8)
    }

    /// A device that writes a `width`x`height` JPEG to the requested path.
    pub fn writing_image(width: u32, height: u32) -> (Self, mpsc::UnboundedReceiver<PathBuf>) {
        Self::with_behavior(Behavior::Write { width, height })
    }

    /// A device that writes to a temporary file and renames it into place,
    /// the way many capture tools finish a download.
    pub fn renaming() -> (Self, mpsc::UnboundedReceiver<PathBuf>) {
        Self::with_behavior(Behavior::WriteThenRename)
    }

    /// A device whose every trigger fails.
    pub fn failing() -> Self {
        Self {
            behavior: Behavior::Fail,
            triggered: None,
        }
    }

    fn with_behavior(behavior: Behavior) -> (Self, mpsc::UnboundedReceiver<PathBuf>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let device = Self {
            behavior,
            triggered: Some(tx),
        };
        (device, rx)
    }
}

#[async_trait]
impl CaptureDevice for MockCaptureDevice {
    fn name(&self) -> &str {
        "mock"
    }

    async fn trigger(&self, output_path: &Path) -> Result<(), CaptureError> {
        match self.behavior {
            Behavior::Fail => {
                return Err(CaptureError::CaptureFailed {
                    reason: "mock capture failure".to_string(),
                    stderr: None,
                })
            }
            Behavior::Write { width, height } => {
                write_gray_jpeg(output_path.to_path_buf(), width, height).await?;
            }
            Behavior::WriteThenRename => {
                let temp = output_path.with_extension("part");
                write_gray_jpeg(temp.clone(), 8, 8).await?;
                tokio::fs::rename(&temp, output_path).await?;
            }
            Behavior::Record => {}
        }

        if let Some(tx) = &self.triggered {
            let _ = tx.send(output_path.to_path_buf());
        }
        Ok(())
    }
}

async fn write_gray_jpeg(path: PathBuf, width: u32, height: u32) -> Result<(), CaptureError> {
    tokio::task::spawn_blocking(move || {
        image::RgbImage::from_pixel(width, height, image::Rgb([128, 128, 128]))
            .save_with_format(&path, image::ImageFormat::Jpeg)
    })
    .await
    .map_err(|e| CaptureError::CaptureFailed {
        reason: e.to_string(),
        stderr: None,
    })?
    .map_err(|e| CaptureError::CaptureFailed {
        reason: e.to_string(),
        stderr: None,
    })
}
