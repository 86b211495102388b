//! Compose stage: blends a per-instance overlay onto the captured image.
//!
//! Overlays live at `{overlay_dir}/{instance_id}/*.png`. Each instance's set is
//! loaded once and cached until anything under the overlay tree changes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::{ImageFormat, RgbaImage};
use notify::event::{AccessKind, AccessMode};
use notify::{EventKind, RecommendedWatcher};
use rand::seq::IndexedRandom;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::{ComposeConfig, CropRect};
use crate::metrics;
use crate::pipeline::{PipelineError, Stage, StageInbox, StageReporter};
use crate::record::SnapRecord;

use super::error::ComposeError;
use super::watch::watch_dir;
use super::{sibling_path, PROCESSED_SUFFIX};

/// Overlays loaded for one instance.
pub type OverlaySet = Arc<[Arc<RgbaImage>]>;

/// Per-instance overlay sets, loaded lazily from disk.
#[derive(Debug)]
pub struct OverlayCache {
    root: PathBuf,
    entries: HashMap<String, OverlaySet>,
}

impl OverlayCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            entries: HashMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding `instance_id`'s overlays, or `None` if the id cannot
    /// name a directory under the root.
    pub fn dir_for(&self, instance_id: &str) -> Option<PathBuf> {
        let usable = !instance_id.is_empty()
            && instance_id != "."
            && instance_id != ".."
            && !instance_id.contains(['/', '\\']);
        usable.then(|| self.root.join(instance_id))
    }

    pub fn get(&self, instance_id: &str) -> Option<OverlaySet> {
        self.entries.get(instance_id).cloned()
    }

    pub fn insert(&mut self, instance_id: impl Into<String>, overlays: Vec<RgbaImage>) -> OverlaySet {
        let set: OverlaySet = overlays.into_iter().map(Arc::new).collect();
        self.entries.insert(instance_id.into(), Arc::clone(&set));
        set
    }

    /// Drops every cached set; the next request per instance reloads from disk.
    pub fn invalidate(&mut self) {
        if !self.entries.is_empty() {
            debug!("Invalidating {} cached overlay sets", self.entries.len());
        }
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Loads every `*.png` in `dir`, in file name order. A missing directory is
/// an empty set.
pub fn load_overlays(dir: &Path) -> Result<Vec<RgbaImage>, ComposeError> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| e.eq_ignore_ascii_case("png"))
        })
        .collect();
    paths.sort();

    paths
        .iter()
        .map(|path| Ok(image::open(path)?.to_rgba8()))
        .collect()
}

/// Adds `overlay` onto `base` per channel, saturating at 255. The result is
/// fully opaque.
///
/// Both images must have the same dimensions.
pub fn blend_additive(base: &mut RgbaImage, overlay: &RgbaImage) {
    for (px, over) in base.pixels_mut().zip(overlay.pixels()) {
        px[0] = px[0].saturating_add(over[0]);
        px[1] = px[1].saturating_add(over[1]);
        px[2] = px[2].saturating_add(over[2]);
        px[3] = u8::MAX;
    }
}

/// Composes the image at `src` and writes it as `{stem}.processed.png`
/// alongside. The source file is removed once the output is written.
///
/// Without an overlay the (optionally cropped) capture is re-encoded as is.
pub fn compose_file(
    src: &Path,
    overlay: Option<&RgbaImage>,
    crop: Option<CropRect>,
) -> Result<PathBuf, ComposeError> {
    let mut img = image::open(src)?.to_rgba8();

    if let Some(rect) = crop {
        img = crop_image(&img, rect)?;
    }

    if let Some(overlay) = overlay {
        if overlay.dimensions() != img.dimensions() {
            return Err(ComposeError::DimensionMismatch {
                expected_width: overlay.width(),
                expected_height: overlay.height(),
                width: img.width(),
                height: img.height(),
            });
        }
        blend_additive(&mut img, overlay);
    }

    let out = sibling_path(src, PROCESSED_SUFFIX);
    img.save_with_format(&out, ImageFormat::Png)?;

    if out != src {
        std::fs::remove_file(src)?;
    }

    Ok(out)
}

fn crop_image(img: &RgbaImage, rect: CropRect) -> Result<RgbaImage, ComposeError> {
    let fits = rect.x.checked_add(rect.width).is_some_and(|r| r <= img.width())
        && rect.y.checked_add(rect.height).is_some_and(|b| b <= img.height());
    if !fits {
        return Err(ComposeError::CropOutOfBounds {
            x: rect.x,
            y: rect.y,
            crop_width: rect.width,
            crop_height: rect.height,
            width: img.width(),
            height: img.height(),
        });
    }
    Ok(image::imageops::crop_imm(img, rect.x, rect.y, rect.width, rect.height).to_image())
}

/// Messages processed by the compose worker.
#[derive(Debug)]
pub enum ComposeMsg {
    Start(SnapRecord),
    /// Something under the overlay tree changed.
    OverlaysChanged,
    /// Blending for `record` finished.
    Finished {
        record: SnapRecord,
        result: Result<PathBuf, ComposeError>,
    },
}

/// Input side of the compose worker. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ComposeHandle {
    tx: mpsc::UnboundedSender<ComposeMsg>,
}

impl ComposeHandle {
    /// Invalidates cached overlays.
    pub fn overlays_changed(&self) {
        let _ = self.tx.send(ComposeMsg::OverlaysChanged);
    }
}

impl StageInbox for ComposeHandle {
    fn start(&self, record: SnapRecord) -> Result<(), PipelineError> {
        self.tx
            .send(ComposeMsg::Start(record))
            .map_err(|_| PipelineError::StageStopped(Stage::Compose))
    }
}

pub struct ComposeWorker {
    overlays: OverlayCache,
    crop: Option<CropRect>,
    reporter: StageReporter,
    inbox: mpsc::UnboundedReceiver<ComposeMsg>,
    inbox_tx: mpsc::UnboundedSender<ComposeMsg>,
    watcher: Option<RecommendedWatcher>,
}

impl ComposeWorker {
    pub fn new(config: &ComposeConfig, reporter: StageReporter) -> (ComposeHandle, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = Self {
            overlays: OverlayCache::new(config.overlay_dir.clone()),
            crop: config.crop,
            reporter,
            inbox: rx,
            inbox_tx: tx.clone(),
            watcher: None,
        };
        (ComposeHandle { tx }, worker)
    }

    /// Creates the overlay root and watches it recursively, invalidating the
    /// cache on every change.
    pub fn watch(mut self) -> Result<Self, ComposeError> {
        let root = self.overlays.root().to_path_buf();
        let watch_failed = |reason: String| ComposeError::WatchFailed {
            path: root.clone(),
            reason,
        };

        std::fs::create_dir_all(&root).map_err(|e| watch_failed(e.to_string()))?;

        let tx = self.inbox_tx.clone();
        let watcher = watch_dir(&root, true, move |event| {
            if is_read_only(&event.kind) {
                return;
            }
            let _ = tx.send(ComposeMsg::OverlaysChanged);
        })
        .map_err(|e| watch_failed(e.to_string()))?;

        info!("Watching {} for overlay changes", root.display());
        self.watcher = Some(watcher);
        Ok(self)
    }

    pub async fn run(mut self) {
        info!("Compose worker started");

        while let Some(msg) = self.inbox.recv().await {
            match msg {
                ComposeMsg::Start(record) => self.on_start(record).await,
                ComposeMsg::OverlaysChanged => self.overlays.invalidate(),
                ComposeMsg::Finished { record, result } => self.on_finished(record, result),
            }
        }

        info!("Compose worker shutting down");
    }

    async fn on_start(&mut self, record: SnapRecord) {
        let Some(src) = record.src_path().map(Path::to_path_buf) else {
            self.abandon(&record, &ComposeError::MissingSource);
            return;
        };

        let overlays = match self.overlays_for(record.instance_id()).await {
            Ok(overlays) => overlays,
            Err(e) => {
                self.abandon(&record, &e);
                return;
            }
        };
        let overlay = overlays.choose(&mut rand::rng()).cloned();
        if overlay.is_none() {
            debug!("No overlays for instance {}", record.instance_id());
        }

        let crop = self.crop;
        let tx = self.inbox_tx.clone();
        tokio::spawn(async move {
            let result = tokio::task::spawn_blocking(move || {
                compose_file(&src, overlay.as_deref(), crop)
            })
            .await
            .unwrap_or_else(|e| Err(ComposeError::Task(e.to_string())));
            let _ = tx.send(ComposeMsg::Finished { record, result });
        });
    }

    async fn overlays_for(&mut self, instance_id: &str) -> Result<OverlaySet, ComposeError> {
        if let Some(set) = self.overlays.get(instance_id) {
            return Ok(set);
        }

        let loaded = match self.overlays.dir_for(instance_id) {
            Some(dir) => tokio::task::spawn_blocking(move || load_overlays(&dir))
                .await
                .map_err(|e| ComposeError::Task(e.to_string()))??,
            None => {
                warn!("Instance id {:?} cannot name an overlay directory", instance_id);
                Vec::new()
            }
        };

        debug!("Loaded {} overlays for instance {}", loaded.len(), instance_id);
        Ok(self.overlays.insert(instance_id, loaded))
    }

    fn on_finished(&self, record: SnapRecord, result: Result<PathBuf, ComposeError>) {
        match result {
            Ok(path) => {
                info!("Composed {} into {}", record, path.display());
                self.reporter.complete(record.with_src_path(path));
            }
            Err(e) => self.abandon(&record, &e),
        }
    }

    fn abandon(&self, record: &SnapRecord, e: &ComposeError) {
        metrics::COMPOSE_ABANDONED.inc();
        error!("Could not compose {}: {}", record, e);
    }
}

fn is_read_only(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Access(access) if *access != AccessKind::Close(AccessMode::Write))
}
