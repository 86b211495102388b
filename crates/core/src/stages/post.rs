//! Post stage: uploads the snap and its thumbnail.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{multipart, Client};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::UploadConfig;
use crate::metrics;
use crate::pipeline::{PipelineError, Stage, StageInbox, StageReporter};
use crate::record::SnapRecord;

use super::error::UploadError;

/// Upload endpoint for a new snap. Ids are percent-encoded so each stays a
/// single path segment.
pub fn snap_url(base_url: &str, org_id: &str, instance_id: &str) -> String {
    format!(
        "{}/v1/org/{}/snap/{}",
        base_url.trim_end_matches('/'),
        urlencoding::encode(org_id),
        urlencoding::encode(instance_id)
    )
}

/// Upload endpoint for the thumbnail of an uploaded snap.
pub fn thumbnail_url(
    base_url: &str,
    org_id: &str,
    instance_id: &str,
    snap_id: &str,
    tag: &str,
) -> String {
    format!(
        "{}/{}?tag={}",
        snap_url(base_url, org_id, instance_id),
        urlencoding::encode(snap_id),
        urlencoding::encode(tag)
    )
}

/// Destination for finished snaps.
#[async_trait]
pub trait SnapUploader: Send + Sync + 'static {
    /// Uploads the snap image and returns the id assigned to it.
    async fn upload_snap(&self, record: &SnapRecord, path: &Path) -> Result<String, UploadError>;

    /// Uploads the thumbnail of the snap `snap_id`.
    async fn upload_thumbnail(
        &self,
        record: &SnapRecord,
        snap_id: &str,
        path: &Path,
    ) -> Result<(), UploadError>;
}

/// Uploads over HTTP with bearer authentication.
pub struct HttpUploader {
    client: Client,
    base_url: String,
    token: String,
}

impl HttpUploader {
    pub fn new(config: &UploadConfig, token: impl Into<String>) -> Result<Self, UploadError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            token: token.into(),
        })
    }

    async fn file_part(path: &Path) -> Result<multipart::Part, UploadError> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "snap".to_string());

        multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str(mime_for(path))
            .map_err(UploadError::from)
    }

    async fn post(&self, url: &str, form: multipart::Form) -> Result<String, UploadError> {
        debug!("POST {}", url);
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.token)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(UploadError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(body)
    }
}

#[async_trait]
impl SnapUploader for HttpUploader {
    async fn upload_snap(&self, record: &SnapRecord, path: &Path) -> Result<String, UploadError> {
        let form = multipart::Form::new()
            .text("sessionId", record.session_id().to_string())
            .text("userId", record.user_id().to_string())
            .text("type", "still")
            .text("tag", record.tag().to_string())
            .part("file", Self::file_part(path).await?);

        let url = snap_url(&self.base_url, record.org_id(), record.instance_id());
        let body = self.post(&url, form).await?;
        parse_snap_id(&body)
    }

    async fn upload_thumbnail(
        &self,
        record: &SnapRecord,
        snap_id: &str,
        path: &Path,
    ) -> Result<(), UploadError> {
        let form = multipart::Form::new().part("file", Self::file_part(path).await?);

        let url = thumbnail_url(
            &self.base_url,
            record.org_id(),
            record.instance_id(),
            snap_id,
            record.tag(),
        );
        self.post(&url, form).await?;
        Ok(())
    }
}

/// Snap upload response.
#[derive(Debug, Deserialize)]
struct SnapResponse {
    body: SnapResponseBody,
}

#[derive(Debug, Deserialize)]
struct SnapResponseBody {
    id: String,
}

fn parse_snap_id(body: &str) -> Result<String, UploadError> {
    serde_json::from_str::<SnapResponse>(body)
        .map(|r| r.body.id)
        .map_err(|e| UploadError::InvalidResponse(e.to_string()))
}

fn mime_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        _ => "application/octet-stream",
    }
}

/// Messages processed by the post worker.
#[derive(Debug)]
pub enum PostMsg {
    Start(SnapRecord),
    /// Uploads for `record` ended.
    Finished {
        record: SnapRecord,
        result: Result<(), UploadError>,
    },
}

/// Input side of the post worker. Cheap to clone.
#[derive(Debug, Clone)]
pub struct PostHandle {
    tx: mpsc::UnboundedSender<PostMsg>,
}

impl StageInbox for PostHandle {
    fn start(&self, record: SnapRecord) -> Result<(), PipelineError> {
        self.tx
            .send(PostMsg::Start(record))
            .map_err(|_| PipelineError::StageStopped(Stage::Post))
    }
}

/// Uploads each record, then completes it whether or not the uploads worked.
pub struct PostWorker<U: SnapUploader> {
    uploader: Arc<U>,
    delete_after_upload: bool,
    reporter: StageReporter,
    inbox: mpsc::UnboundedReceiver<PostMsg>,
    inbox_tx: mpsc::UnboundedSender<PostMsg>,
}

impl<U: SnapUploader> PostWorker<U> {
    pub fn new(
        uploader: Arc<U>,
        delete_after_upload: bool,
        reporter: StageReporter,
    ) -> (PostHandle, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = Self {
            uploader,
            delete_after_upload,
            reporter,
            inbox: rx,
            inbox_tx: tx.clone(),
        };
        (PostHandle { tx }, worker)
    }

    pub async fn run(mut self) {
        info!("Post worker started");

        while let Some(msg) = self.inbox.recv().await {
            match msg {
                PostMsg::Start(record) => {
                    let uploader = Arc::clone(&self.uploader);
                    let tx = self.inbox_tx.clone();
                    tokio::spawn(async move {
                        let started = Instant::now();
                        let (record, result) = upload_all(uploader.as_ref(), record).await;
                        let label = if result.is_ok() { "success" } else { "failure" };
                        metrics::UPLOAD_DURATION
                            .with_label_values(&[label])
                            .observe(started.elapsed().as_secs_f64());
                        let _ = tx.send(PostMsg::Finished { record, result });
                    });
                }
                PostMsg::Finished { record, result } => self.on_finished(record, result).await,
            }
        }

        info!("Post worker shutting down");
    }

    async fn on_finished(&self, record: SnapRecord, result: Result<(), UploadError>) {
        match result {
            Ok(()) => {
                info!("Uploaded {}", record);
                if self.delete_after_upload {
                    delete_local_files(&record).await;
                }
            }
            Err(e) => {
                metrics::UPLOAD_FAILURES.inc();
                error!("Upload failed for {}: {}", record, e);
            }
        }

        self.reporter.complete(record);
    }
}

/// Uploads the snap, then its thumbnail if one exists and has not been sent.
/// Returns the record as far as it got.
async fn upload_all<U: SnapUploader + ?Sized>(
    uploader: &U,
    record: SnapRecord,
) -> (SnapRecord, Result<(), UploadError>) {
    let Some(src) = record.src_path().map(Path::to_path_buf) else {
        return (record, Err(UploadError::MissingSource));
    };

    let snap_id = match uploader.upload_snap(&record, &src).await {
        Ok(id) => id,
        Err(e) => return (record, Err(e)),
    };
    let record = record.with_snap_id(snap_id.clone());

    let thumb: Option<PathBuf> = record.thumb_path().map(Path::to_path_buf);
    match thumb {
        Some(thumb) if !record.thumb_uploaded() => {
            match uploader.upload_thumbnail(&record, &snap_id, &thumb).await {
                Ok(()) => (record.with_thumb_uploaded(), Ok(())),
                Err(e) => (record, Err(e)),
            }
        }
        _ => (record, Ok(())),
    }
}

async fn delete_local_files(record: &SnapRecord) {
    for path in [record.src_path(), record.thumb_path()].into_iter().flatten() {
        if let Err(e) = tokio::fs::remove_file(path).await {
            warn!("Could not delete {}: {}", path.display(), e);
        }
    }
}
