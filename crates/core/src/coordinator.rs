//! Application coordinator: turns control commands into pipeline runs and
//! wires the whole controller together.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::Config;
use crate::connection::{
    ConnectParams, ConnectionClient, ConnectionHandle, ConnectionNotice, ConnectionState,
    ConnectionTiming, Connector, TakeCaptureCommand, WebSocketConnector,
};
use crate::pipeline::{PipelineHandle, PipelineOrchestrator, Stage, StageSet};
use crate::record::SnapRecord;
use crate::stages::{
    CaptureDevice, CaptureError, CaptureWorker, CommandCaptureDevice, ComposeError, ComposeWorker,
    HttpUploader, PostWorker, SnapUploader, ThumbnailWorker, UploadError,
};

/// Errors that prevent the application from starting.
#[derive(Debug, Error)]
pub enum StartError {
    #[error("Capture stage: {0}")]
    Capture(#[from] CaptureError),

    #[error("Compose stage: {0}")]
    Compose(#[from] ComposeError),

    #[error("Uploader: {0}")]
    Upload(#[from] UploadError),
}

/// Builds the record for a take-capture command.
pub fn record_for(org_id: &str, command: TakeCaptureCommand) -> SnapRecord {
    SnapRecord::new(
        org_id,
        command.instance_id,
        command.session_id,
        command.user_id,
        command.tag,
    )
}

/// Starts one run per take-capture command, in arrival order.
pub struct Coordinator {
    org_id: String,
    pipeline: PipelineHandle,
    inbox: mpsc::UnboundedReceiver<ConnectionNotice>,
}

impl Coordinator {
    /// Returns the sender to hand to the connection client as its subscriber.
    pub fn new(
        org_id: impl Into<String>,
        pipeline: PipelineHandle,
    ) -> (mpsc::UnboundedSender<ConnectionNotice>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        let coordinator = Self {
            org_id: org_id.into(),
            pipeline,
            inbox: rx,
        };
        (tx, coordinator)
    }

    pub async fn run(mut self) {
        info!("Coordinator started for org {}", self.org_id);

        while let Some(notice) = self.inbox.recv().await {
            match notice {
                ConnectionNotice::Ready { url } => info!("Control connection ready at {}", url),
                ConnectionNotice::TakeCapture(command) => {
                    let record = record_for(&self.org_id, command);
                    if let Err(e) = self.pipeline.start(record) {
                        error!("Could not start run: {}", e);
                    }
                }
            }
        }

        info!("Coordinator shutting down");
    }
}

/// External collaborators the application runs against.
pub struct Collaborators<C, D, U> {
    pub connector: Arc<C>,
    pub device: Arc<D>,
    pub uploader: Arc<U>,
    /// Receives every run that leaves the Post stage.
    pub run_listener: Option<mpsc::UnboundedSender<SnapRecord>>,
}

impl<C, D, U> Collaborators<C, D, U> {
    pub fn new(connector: Arc<C>, device: Arc<D>, uploader: Arc<U>) -> Self {
        Self {
            connector,
            device,
            uploader,
            run_listener: None,
        }
    }

    pub fn with_run_listener(mut self, listener: mpsc::UnboundedSender<SnapRecord>) -> Self {
        self.run_listener = Some(listener);
        self
    }
}

impl Collaborators<WebSocketConnector, CommandCaptureDevice, HttpUploader> {
    /// The real socket, capture command and HTTP uploader.
    pub fn from_config(config: &Config) -> Result<Self, StartError> {
        Ok(Self::new(
            Arc::new(WebSocketConnector::new()),
            Arc::new(CommandCaptureDevice::from_config(&config.capture)),
            Arc::new(HttpUploader::new(&config.upload, config.control.token.clone())?),
        ))
    }
}

/// A running controller.
pub struct Application {
    connection: ConnectionHandle,
    connection_task: JoinHandle<()>,
    tasks: Vec<JoinHandle<()>>,
}

impl Application {
    /// Spawns every component and asks the connection client to connect.
    ///
    /// Must be called from within a tokio runtime. Creates and watches the
    /// capture output and overlay directories.
    pub fn start<C, D, U>(
        config: &Config,
        collaborators: Collaborators<C, D, U>,
    ) -> Result<Self, StartError>
    where
        C: Connector,
        D: CaptureDevice,
        U: SnapUploader,
    {
        let (pipeline, pipeline_inbox) = PipelineHandle::channel();

        let (capture, capture_worker) = CaptureWorker::new(
            config.capture.output_dir.clone(),
            collaborators.device,
            pipeline.reporter(Stage::Capture),
        );
        let capture_worker = capture_worker.watch()?;

        let (compose, compose_worker) =
            ComposeWorker::new(&config.compose, pipeline.reporter(Stage::Compose));
        let compose_worker = compose_worker.watch()?;

        let (thumbnail, thumbnail_worker) =
            ThumbnailWorker::new(&config.thumbnail, pipeline.reporter(Stage::Thumbnail));

        let (post, post_worker) = PostWorker::new(
            collaborators.uploader,
            config.upload.delete_after_upload,
            pipeline.reporter(Stage::Post),
        );

        let stages = StageSet {
            capture: Arc::new(capture),
            compose: Arc::new(compose),
            thumbnail: Arc::new(thumbnail),
            post: Arc::new(post),
        };
        let mut orchestrator = PipelineOrchestrator::new(pipeline_inbox, stages);
        if let Some(listener) = collaborators.run_listener {
            orchestrator = orchestrator.with_run_listener(listener);
        }

        let (subscriber, coordinator) = Coordinator::new(config.control.org_id.clone(), pipeline);

        let (connection, client) = ConnectionClient::new(
            collaborators.connector,
            ConnectionTiming::from(&config.control),
        );

        let tasks = vec![
            tokio::spawn(capture_worker.run()),
            tokio::spawn(compose_worker.run()),
            tokio::spawn(thumbnail_worker.run()),
            tokio::spawn(post_worker.run()),
            tokio::spawn(orchestrator.run()),
            tokio::spawn(coordinator.run()),
        ];
        let connection_task = tokio::spawn(client.run());

        connection.connect(ConnectParams {
            url: config.control.url.clone(),
            token: config.control.token.clone(),
            org_id: config.control.org_id.clone(),
            subscriber,
        });

        info!("Application started");
        Ok(Self {
            connection,
            connection_task,
            tasks,
        })
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Receiver that observes every connection state change.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection.subscribe_state()
    }

    /// Closes the control connection and stops every worker. Runs still in
    /// flight are dropped.
    pub async fn shutdown(self) {
        info!("Application shutting down");
        self.connection.shutdown();
        if let Err(e) = self.connection_task.await {
            error!("Connection client ended abnormally: {}", e);
        }

        for task in &self.tasks {
            task.abort();
        }
        for task in self.tasks {
            let _ = task.await;
        }
        info!("Application stopped");
    }
}
