//! Sequences runs through the stage workers.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info};

use crate::metrics;
use crate::record::SnapRecord;

use super::types::{PipelineError, PipelineMsg, Stage, StageInbox, StageReporter};

/// Handle for starting runs. Cheap to clone.
#[derive(Debug, Clone)]
pub struct PipelineHandle {
    tx: mpsc::UnboundedSender<PipelineMsg>,
}

impl PipelineHandle {
    /// Create a new pipeline handle from a channel sender
    pub fn new(tx: mpsc::UnboundedSender<PipelineMsg>) -> Self {
        Self { tx }
    }

    /// Creates the orchestrator's inbox. Build the workers with
    /// [`PipelineHandle::reporter`] before handing the receiver to
    /// [`PipelineOrchestrator::new`].
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<PipelineMsg>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    /// Starts a new run. Runs are independent; this never waits on another run.
    pub fn start(&self, record: SnapRecord) -> Result<(), PipelineError> {
        self.tx
            .send(PipelineMsg::Start(record))
            .map_err(|_| PipelineError::NotRunning)
    }

    /// Completion reporter for the worker running `stage`.
    pub fn reporter(&self, stage: Stage) -> StageReporter {
        StageReporter::new(stage, self.tx.clone())
    }
}

/// The four workers, addressable by stage.
#[derive(Clone)]
pub struct StageSet {
    pub capture: Arc<dyn StageInbox>,
    pub compose: Arc<dyn StageInbox>,
    pub thumbnail: Arc<dyn StageInbox>,
    pub post: Arc<dyn StageInbox>,
}

impl StageSet {
    pub fn get(&self, stage: Stage) -> &Arc<dyn StageInbox> {
        match stage {
            Stage::Capture => &self.capture,
            Stage::Compose => &self.compose,
            Stage::Thumbnail => &self.thumbnail,
            Stage::Post => &self.post,
        }
    }
}

/// Routes every record to the next stage when the previous one completes.
///
/// Processes one message at a time but never waits on a stage, so any number
/// of runs can be in flight.
pub struct PipelineOrchestrator {
    inbox: mpsc::UnboundedReceiver<PipelineMsg>,
    stages: StageSet,
    run_listener: Option<mpsc::UnboundedSender<SnapRecord>>,
}

impl PipelineOrchestrator {
    pub fn new(inbox: mpsc::UnboundedReceiver<PipelineMsg>, stages: StageSet) -> Self {
        Self {
            inbox,
            stages,
            run_listener: None,
        }
    }

    /// Receives the final record of every run that leaves the Post stage.
    pub fn with_run_listener(mut self, listener: mpsc::UnboundedSender<SnapRecord>) -> Self {
        self.run_listener = Some(listener);
        self
    }

    /// Run the orchestrator until every handle and reporter is dropped.
    pub async fn run(mut self) {
        info!("Pipeline orchestrator started");

        while let Some(msg) = self.inbox.recv().await {
            match msg {
                PipelineMsg::Start(record) => {
                    metrics::RUNS_STARTED.inc();
                    info!("Starting pipeline for {}", record);
                    self.dispatch(Stage::first(), record);
                }
                PipelineMsg::Complete { stage, record } => self.on_complete(stage, record),
            }
        }

        info!("Pipeline orchestrator shutting down");
    }

    fn on_complete(&self, stage: Stage, record: SnapRecord) {
        metrics::STAGE_COMPLETIONS
            .with_label_values(&[stage.as_str()])
            .inc();

        match stage.next() {
            Some(next) => {
                info!("{} complete, moving along to {} for {}", stage, next, record);
                self.dispatch(next, record);
            }
            None => {
                metrics::RUNS_COMPLETED.inc();
                info!("Pipeline complete for {}", record);
                if let Some(listener) = &self.run_listener {
                    let _ = listener.send(record);
                }
            }
        }
    }

    fn dispatch(&self, stage: Stage, record: SnapRecord) {
        if let Err(e) = self.stages.get(stage).start(record) {
            error!("Could not hand record to {}: {}", stage, e);
        }
    }
}
