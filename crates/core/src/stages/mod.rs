//! Stage workers of the capture pipeline.
//!
//! Each worker is a task with its own inbox, processing one message at a
//! time. Slow work (device invocation, image processing, uploads) runs off the
//! worker's loop and its outcome comes back as a message, so a worker keeps
//! accepting records while earlier ones are in flight.
//!
//! - **Capture**: triggers the capture device and matches the file it writes
//!   back to the record by correlation id
//! - **Compose**: blends a per-instance overlay onto the capture
//! - **Thumbnail**: writes a reduced JPEG next to the image
//! - **Post**: uploads the image (and thumbnail) and assigns the snap id

mod capture;
mod compose;
mod error;
mod post;
mod thumbnail;
mod watch;

pub use capture::{CaptureDevice, CaptureHandle, CaptureMsg, CaptureWorker, CommandCaptureDevice};
pub use compose::{
    blend_additive, compose_file, load_overlays, ComposeHandle, ComposeMsg, ComposeWorker,
    OverlayCache,
};
pub use error::{CaptureError, ComposeError, ThumbnailError, UploadError};
pub use post::{snap_url, thumbnail_url, HttpUploader, PostHandle, PostMsg, PostWorker, SnapUploader};
pub use thumbnail::{make_thumbnail, ThumbnailHandle, ThumbnailWorker};

use std::path::{Path, PathBuf};

/// Suffix of the composed image.
pub const PROCESSED_SUFFIX: &str = ".processed.png";

/// Suffix of the thumbnail.
pub const THUMBNAIL_SUFFIX: &str = ".thumb.jpg";

/// `dir/stem.jpg` -> `dir/stem{suffix}`.
pub fn sibling_path(path: &Path, suffix: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{}{}", stem, suffix))
}
