//! Mock uploader for testing.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::record::SnapRecord;
use crate::stages::{SnapUploader, UploadError};

#[derive(Debug, Default)]
struct State {
    snap_id: Option<String>,
    fail_snaps: bool,
    fail_thumbnails: bool,
    snaps: Vec<PathBuf>,
    thumbnails: Vec<(String, PathBuf)>,
    records: Vec<SnapRecord>,
}

/// Mock implementation of the SnapUploader trait.
///
/// Records every upload. Snap uploads return the configured id, or
/// `snap-{n}` counting from 1.
#[derive(Debug, Clone, Default)]
pub struct MockUploader {
    state: Arc<Mutex<State>>,
}

impl MockUploader {
    /// Create a new mock uploader.
    pub fn new() -> Self {
        Self::default()
    }

    /// Id returned by every snap upload.
    pub fn set_snap_id(&self, id: impl Into<String>) {
        self.lock().snap_id = Some(id.into());
    }

    pub fn fail_snap_uploads(&self) {
        self.lock().fail_snaps = true;
    }

    pub fn fail_thumbnail_uploads(&self) {
        self.lock().fail_thumbnails = true;
    }

    /// Paths of attempted snap uploads.
    pub fn snap_uploads(&self) -> Vec<PathBuf> {
        self.lock().snaps.clone()
    }

    /// `(snap id, path)` of attempted thumbnail uploads.
    pub fn thumbnail_uploads(&self) -> Vec<(String, PathBuf)> {
        self.lock().thumbnails.clone()
    }

    /// Records passed to snap uploads.
    pub fn uploaded_records(&self) -> Vec<SnapRecord> {
        self.lock().records.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("mock uploader lock poisoned")
    }
}

#[async_trait]
impl SnapUploader for MockUploader {
    async fn upload_snap(&self, record: &SnapRecord, path: &Path) -> Result<String, UploadError> {
        let mut state = self.lock();
        state.snaps.push(path.to_path_buf());
        state.records.push(record.clone());
        if state.fail_snaps {
            return Err(UploadError::Status {
                status: 500,
                body: "mock failure".to_string(),
            });
        }
        let id = state
            .snap_id
            .clone()
            .unwrap_or_else(|| format!("snap-{}", state.snaps.len()));
        Ok(id)
    }

    async fn upload_thumbnail(
        &self,
        _record: &SnapRecord,
        snap_id: &str,
        path: &Path,
    ) -> Result<(), UploadError> {
        let mut state = self.lock();
        state.thumbnails.push((snap_id.to_string(), path.to_path_buf()));
        if state.fail_thumbnails {
            return Err(UploadError::Timeout);
        }
        Ok(())
    }
}
