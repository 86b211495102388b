//! Thumbnail stage.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::ThumbnailConfig;
use crate::pipeline::{PipelineError, Stage, StageInbox, StageReporter};
use crate::record::SnapRecord;

use super::error::ThumbnailError;
use super::{sibling_path, THUMBNAIL_SUFFIX};

/// Writes a JPEG reduced by `scale_divisor` on each side next to `src`, as
/// `{stem}.thumb.jpg`.
pub fn make_thumbnail(src: &Path, scale_divisor: u32, quality: u8) -> Result<PathBuf, ThumbnailError> {
    let img = image::open(src)?;
    let divisor = scale_divisor.max(1);
    let width = (img.width() / divisor).max(1);
    let height = (img.height() / divisor).max(1);

    let thumb = img.resize_exact(width, height, FilterType::Triangle).to_rgb8();

    let out = sibling_path(src, THUMBNAIL_SUFFIX);
    let mut writer = BufWriter::new(File::create(&out)?);
    JpegEncoder::new_with_quality(&mut writer, quality).encode_image(&thumb)?;
    writer.flush()?;

    Ok(out)
}

/// Input side of the thumbnail worker.
#[derive(Debug, Clone)]
pub struct ThumbnailHandle {
    tx: mpsc::UnboundedSender<SnapRecord>,
}

impl StageInbox for ThumbnailHandle {
    fn start(&self, record: SnapRecord) -> Result<(), PipelineError> {
        self.tx
            .send(record)
            .map_err(|_| PipelineError::StageStopped(Stage::Thumbnail))
    }
}

/// Generates thumbnails. A failure never stops the run; the record just
/// moves on without a thumbnail.
pub struct ThumbnailWorker {
    config: ThumbnailConfig,
    reporter: StageReporter,
    inbox: mpsc::UnboundedReceiver<SnapRecord>,
}

impl ThumbnailWorker {
    pub fn new(config: &ThumbnailConfig, reporter: StageReporter) -> (ThumbnailHandle, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = Self {
            config: config.clone(),
            reporter,
            inbox: rx,
        };
        (ThumbnailHandle { tx }, worker)
    }

    pub async fn run(mut self) {
        info!("Thumbnail worker started");

        while let Some(record) = self.inbox.recv().await {
            let reporter = self.reporter.clone();
            let divisor = self.config.scale_divisor;
            let quality = self.config.quality;

            tokio::spawn(async move {
                let result = match record.src_path().map(Path::to_path_buf) {
                    Some(src) => tokio::task::spawn_blocking(move || {
                        make_thumbnail(&src, divisor, quality)
                    })
                    .await
                    .unwrap_or_else(|e| Err(ThumbnailError::Task(e.to_string()))),
                    None => Err(ThumbnailError::MissingSource),
                };

                match result {
                    Ok(path) => {
                        info!("Thumbnail for {} at {}", record, path.display());
                        reporter.complete(record.with_thumb_path(path));
                    }
                    Err(e) => {
                        warn!("No thumbnail for {}: {}", record, e);
                        reporter.complete(record);
                    }
                }
            });
        }

        info!("Thumbnail worker shutting down");
    }
}
