//! Capture stage: triggers the camera and waits for the image to land on disk.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use notify::event::{AccessKind, AccessMode, ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::config::CaptureConfig;
use crate::pipeline::{PipelineError, Stage, StageInbox, StageReporter};
use crate::record::SnapRecord;

use super::error::CaptureError;
use super::watch::watch_dir;

/// Placeholder replaced by the output path in capture command arguments.
const PATH_PLACEHOLDER: &str = "{path}";

/// A camera that writes one image to a given path.
///
/// `trigger` only has to start the capture; the stage learns about the
/// finished image from the output directory, not from the return value.
#[async_trait]
pub trait CaptureDevice: Send + Sync + 'static {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Capture one image to `output_path`.
    async fn trigger(&self, output_path: &Path) -> Result<(), CaptureError>;
}

/// Captures by running an external command such as `gphoto2`.
#[derive(Debug, Clone)]
pub struct CommandCaptureDevice {
    command: String,
    args: Vec<String>,
}

impl CommandCaptureDevice {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }

    pub fn from_config(config: &CaptureConfig) -> Self {
        Self::new(config.command.clone(), config.args.clone())
    }

    /// Arguments with every `{path}` replaced by `output_path`.
    pub fn args_for(&self, output_path: &Path) -> Vec<String> {
        let path = output_path.to_string_lossy();
        self.args
            .iter()
            .map(|arg| arg.replace(PATH_PLACEHOLDER, &path))
            .collect()
    }
}

#[async_trait]
impl CaptureDevice for CommandCaptureDevice {
    fn name(&self) -> &str {
        &self.command
    }

    async fn trigger(&self, output_path: &Path) -> Result<(), CaptureError> {
        let args = self.args_for(output_path);
        debug!("Running {} {:?}", self.command, args);

        let output = Command::new(&self.command)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    CaptureError::CommandNotFound {
                        command: self.command.clone(),
                    }
                } else {
                    CaptureError::Io(e)
                }
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(CaptureError::CaptureFailed {
                reason: format!("{} exited with {}", self.command, output.status),
                stderr: (!stderr.is_empty()).then_some(stderr),
            });
        }

        Ok(())
    }
}

/// Messages processed by the capture worker.
#[derive(Debug)]
pub enum CaptureMsg {
    Start(SnapRecord),
    /// An image finished writing in the output directory.
    FileCreated(PathBuf),
    /// The device could not be triggered for this correlation id.
    TriggerFailed { id: String, error: CaptureError },
}

/// Input side of the capture worker. Cheap to clone.
#[derive(Debug, Clone)]
pub struct CaptureHandle {
    tx: mpsc::UnboundedSender<CaptureMsg>,
}

impl CaptureHandle {
    /// Reports a file written into the output directory.
    pub fn file_created(&self, path: impl Into<PathBuf>) {
        let _ = self.tx.send(CaptureMsg::FileCreated(path.into()));
    }
}

impl StageInbox for CaptureHandle {
    fn start(&self, record: SnapRecord) -> Result<(), PipelineError> {
        self.tx
            .send(CaptureMsg::Start(record))
            .map_err(|_| PipelineError::StageStopped(Stage::Capture))
    }
}

/// Owns the correlation table between outstanding captures and records.
pub struct CaptureWorker<D: CaptureDevice> {
    output_dir: PathBuf,
    device: Arc<D>,
    reporter: StageReporter,
    inbox: mpsc::UnboundedReceiver<CaptureMsg>,
    inbox_tx: mpsc::UnboundedSender<CaptureMsg>,
    pending: HashMap<String, SnapRecord>,
    watcher: Option<RecommendedWatcher>,
}

impl<D: CaptureDevice> CaptureWorker<D> {
    pub fn new(
        output_dir: impl Into<PathBuf>,
        device: Arc<D>,
        reporter: StageReporter,
    ) -> (CaptureHandle, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = Self {
            output_dir: output_dir.into(),
            device,
            reporter,
            inbox: rx,
            inbox_tx: tx.clone(),
            pending: HashMap::new(),
            watcher: None,
        };
        (CaptureHandle { tx }, worker)
    }

    /// Creates the output directory and starts watching it for finished
    /// images. Without this the worker only learns about files through
    /// [`CaptureHandle::file_created`].
    pub fn watch(mut self) -> Result<Self, CaptureError> {
        let watch_failed = |reason: String| CaptureError::WatchFailed {
            path: self.output_dir.clone(),
            reason,
        };

        std::fs::create_dir_all(&self.output_dir).map_err(|e| watch_failed(e.to_string()))?;

        let tx = self.inbox_tx.clone();
        let watcher = watch_dir(&self.output_dir, false, move |event| {
            if !is_finished_write(&event.kind) {
                return;
            }
            for path in event.paths {
                let _ = tx.send(CaptureMsg::FileCreated(path));
            }
        })
        .map_err(|e| watch_failed(e.to_string()))?;

        info!("Watching {} for captures", self.output_dir.display());
        self.watcher = Some(watcher);
        Ok(self)
    }

    pub async fn run(mut self) {
        info!("Capture worker started ({})", self.device.name());

        while let Some(msg) = self.inbox.recv().await {
            match msg {
                CaptureMsg::Start(record) => self.on_start(record),
                CaptureMsg::FileCreated(path) => self.on_file_created(path),
                CaptureMsg::TriggerFailed { id, error } => {
                    if let Some(record) = self.pending.remove(&id) {
                        error!("Capture failed for {}: {}", record, error);
                    }
                }
            }
        }

        info!("Capture worker shutting down");
    }

    fn on_start(&mut self, record: SnapRecord) {
        let id = Uuid::new_v4().to_string();
        let path = self.output_dir.join(format!("{}.jpg", id));
        info!("Capturing {} as {}", record, id);

        self.pending.insert(id.clone(), record);

        let device = Arc::clone(&self.device);
        let tx = self.inbox_tx.clone();
        tokio::spawn(async move {
            if let Err(error) = device.trigger(&path).await {
                let _ = tx.send(CaptureMsg::TriggerFailed { id, error });
            }
        });
    }

    fn on_file_created(&mut self, path: PathBuf) {
        let Some(id) = correlation_id(&path) else {
            return;
        };

        match self.pending.remove(id) {
            Some(record) => {
                info!("Capture {} written to {}", id, path.display());
                self.reporter.complete(record.with_src_path(&path));
            }
            None => debug!("Ignoring untracked file {}", path.display()),
        }
    }
}

/// The id a capture was requested under, taken from a `{id}.jpg` file name.
fn correlation_id(path: &Path) -> Option<&str> {
    let is_jpg = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("jpg"));
    if !is_jpg {
        return None;
    }
    path.file_stem().and_then(|s| s.to_str())
}

/// A capture file is complete once it is renamed into the directory, or once
/// the writer closes it. inotify reports close-after-write; elsewhere creation
/// is the only signal for files written in place.
fn is_finished_write(kind: &EventKind) -> bool {
    match kind {
        EventKind::Modify(ModifyKind::Name(RenameMode::To | RenameMode::Both)) => true,
        EventKind::Modify(ModifyKind::Name(RenameMode::Any)) => !cfg!(target_os = "linux"),
        EventKind::Access(AccessKind::Close(AccessMode::Write)) => cfg!(target_os = "linux"),
        EventKind::Create(_) => !cfg!(target_os = "linux"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{PipelineHandle, PipelineMsg};
    use crate::testing::MockCaptureDevice;
    use std::time::Duration;

    async fn next_completion(
        rx: &mut mpsc::UnboundedReceiver<PipelineMsg>,
    ) -> Option<(Stage, SnapRecord)> {
        match tokio::time::timeout(Duration::from_millis(200), rx.recv()).await {
            Ok(Some(PipelineMsg::Complete { stage, record })) => Some((stage, record)),
            _ => None,
        }
    }

    #[test]
    fn test_args_substitute_path() {
        let device = CommandCaptureDevice::new(
            "gphoto2",
            vec![
                "--capture-image-and-download".to_string(),
                "--filename={path}".to_string(),
            ],
        );
        let args = device.args_for(Path::new("/snaps/abc.jpg"));
        assert_eq!(args[0], "--capture-image-and-download");
        assert_eq!(args[1], "--filename=/snaps/abc.jpg");
    }

    #[test]
    fn test_correlation_id() {
        assert_eq!(correlation_id(Path::new("/s/abc.jpg")), Some("abc"));
        assert_eq!(correlation_id(Path::new("/s/abc.JPG")), Some("abc"));
        assert_eq!(correlation_id(Path::new("/s/abc.png")), None);
        assert_eq!(correlation_id(Path::new("/s/abc")), None);
    }

    #[tokio::test]
    async fn test_missing_command_reports_not_found() {
        let device = CommandCaptureDevice::new("snap-no-such-camera-tool", vec![]);
        let result = device.trigger(Path::new("/tmp/x.jpg")).await;
        assert!(matches!(result, Err(CaptureError::CommandNotFound { .. })));
    }

    #[tokio::test]
    async fn test_matching_file_completes_with_src_path() {
        let (pipeline, mut pipeline_rx) = PipelineHandle::channel();
        let (device, mut triggered) = MockCaptureDevice::new();
        let (handle, worker) =
            CaptureWorker::new("/snaps", Arc::new(device), pipeline.reporter(Stage::Capture));
        tokio::spawn(worker.run());

        let record = SnapRecord::new("o", "i", "s", "u", "t");
        handle.start(record.clone()).unwrap();

        let path = triggered.recv().await.unwrap();
        assert_eq!(path.parent(), Some(Path::new("/snaps")));
        handle.file_created(&path);

        let (stage, done) = next_completion(&mut pipeline_rx).await.unwrap();
        assert_eq!(stage, Stage::Capture);
        assert_eq!(done, record.with_src_path(&path));
    }

    #[tokio::test]
    async fn test_unrelated_file_is_ignored() {
        let (pipeline, mut pipeline_rx) = PipelineHandle::channel();
        let (device, mut triggered) = MockCaptureDevice::new();
        let (handle, worker) =
            CaptureWorker::new("/snaps", Arc::new(device), pipeline.reporter(Stage::Capture));
        tokio::spawn(worker.run());

        handle.start(SnapRecord::new("o", "i", "s", "u", "t")).unwrap();
        let path = triggered.recv().await.unwrap();

        handle.file_created("/snaps/not-a-capture.jpg");
        assert!(next_completion(&mut pipeline_rx).await.is_none());

        // The real file still completes the run, exactly once.
        handle.file_created(&path);
        assert!(next_completion(&mut pipeline_rx).await.is_some());
        handle.file_created(&path);
        assert!(next_completion(&mut pipeline_rx).await.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_captures_match_their_own_files() {
        let (pipeline, mut pipeline_rx) = PipelineHandle::channel();
        let (device, mut triggered) = MockCaptureDevice::new();
        let (handle, worker) =
            CaptureWorker::new("/snaps", Arc::new(device), pipeline.reporter(Stage::Capture));
        tokio::spawn(worker.run());

        let first = SnapRecord::new("o", "first", "s", "u", "t");
        let second = SnapRecord::new("o", "second", "s", "u", "t");
        handle.start(first.clone()).unwrap();
        handle.start(second.clone()).unwrap();

        let mut paths = vec![
            triggered.recv().await.unwrap(),
            triggered.recv().await.unwrap(),
        ];
        paths.reverse();
        for path in &paths {
            handle.file_created(path);
        }

        let mut done = Vec::new();
        while let Some((_, record)) = next_completion(&mut pipeline_rx).await {
            done.push(record);
        }
        assert_eq!(done.len(), 2);
        for record in done {
            let src = record.src_path().unwrap().to_path_buf();
            assert!(paths.contains(&src));
            assert!(record.instance_id() == "first" || record.instance_id() == "second");
        }
    }

    #[tokio::test]
    async fn test_failed_trigger_drops_run() {
        let (pipeline, mut pipeline_rx) = PipelineHandle::channel();
        let device = MockCaptureDevice::failing();
        let (handle, worker) =
            CaptureWorker::new("/snaps", Arc::new(device), pipeline.reporter(Stage::Capture));
        tokio::spawn(worker.run());

        handle.start(SnapRecord::new("o", "i", "s", "u", "t")).unwrap();
        assert!(next_completion(&mut pipeline_rx).await.is_none());
    }

    #[test]
    fn test_rename_into_directory_finishes_capture() {
        assert!(is_finished_write(&EventKind::Modify(ModifyKind::Name(
            RenameMode::To
        ))));
        assert!(is_finished_write(&EventKind::Modify(ModifyKind::Name(
            RenameMode::Both
        ))));
        assert!(!is_finished_write(&EventKind::Modify(ModifyKind::Name(
            RenameMode::From
        ))));
        assert!(!is_finished_write(&EventKind::Access(AccessKind::Open(
            AccessMode::Any
        ))));
    }

    #[tokio::test]
    async fn test_watcher_picks_up_renamed_file() {
        let dir = tempfile::tempdir().unwrap();
        let (pipeline, mut pipeline_rx) = PipelineHandle::channel();
        let (device, mut triggered) = MockCaptureDevice::renaming();
        let (handle, worker) = CaptureWorker::new(
            dir.path(),
            Arc::new(device),
            pipeline.reporter(Stage::Capture),
        );
        let worker = worker.watch().unwrap();
        tokio::spawn(worker.run());

        let record = SnapRecord::new("o", "i", "s", "u", "t");
        handle.start(record.clone()).unwrap();
        let path = triggered.recv().await.unwrap();

        let done = tokio::time::timeout(Duration::from_secs(5), pipeline_rx.recv())
            .await
            .unwrap();
        match done {
            Some(PipelineMsg::Complete { stage, record: done }) => {
                assert_eq!(stage, Stage::Capture);
                assert_eq!(done.instance_id(), record.instance_id());
                assert_eq!(
                    done.src_path().and_then(|p| p.file_name()),
                    path.file_name()
                );
            }
            other => panic!("unexpected message: {:?}", other),
        }
        assert!(next_completion(&mut pipeline_rx).await.is_none());
    }

    #[tokio::test]
    async fn test_watcher_picks_up_written_file() {
        let dir = tempfile::tempdir().unwrap();
        let (pipeline, mut pipeline_rx) = PipelineHandle::channel();
        let (device, mut triggered) = MockCaptureDevice::writing();
        let (handle, worker) = CaptureWorker::new(
            dir.path(),
            Arc::new(device),
            pipeline.reporter(Stage::Capture),
        );
        let worker = worker.watch().unwrap();
        tokio::spawn(worker.run());

        handle.start(SnapRecord::new("o", "i", "s", "u", "t")).unwrap();
        let path = triggered.recv().await.unwrap();

        let done = tokio::time::timeout(Duration::from_secs(5), pipeline_rx.recv())
            .await
            .unwrap();
        match done {
            Some(PipelineMsg::Complete { record, .. }) => {
                assert_eq!(
                    record.src_path().and_then(|p| p.file_name()),
                    path.file_name()
                );
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }
}
