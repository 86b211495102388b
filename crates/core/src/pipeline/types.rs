//! Types shared by the orchestrator and the stage workers.

use std::fmt;

use serde::Serialize;
use tokio::sync::mpsc;

use crate::record::SnapRecord;

/// Error type for pipeline messaging.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The receiving worker has stopped.
    #[error("{0} stage is not running")]
    StageStopped(Stage),

    /// The orchestrator has stopped.
    #[error("Pipeline is not running")]
    NotRunning,
}

/// The fixed stages of a run, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Capture,
    Compose,
    Thumbnail,
    Post,
}

impl Stage {
    pub const ALL: [Stage; 4] = [Stage::Capture, Stage::Compose, Stage::Thumbnail, Stage::Post];

    pub fn first() -> Stage {
        Stage::Capture
    }

    /// The stage a record moves to after this one, if any.
    pub fn next(&self) -> Option<Stage> {
        match self {
            Stage::Capture => Some(Stage::Compose),
            Stage::Compose => Some(Stage::Thumbnail),
            Stage::Thumbnail => Some(Stage::Post),
            Stage::Post => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Capture => "capture",
            Stage::Compose => "compose",
            Stage::Thumbnail => "thumbnail",
            Stage::Post => "post",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Messages processed by the orchestrator.
#[derive(Debug, Clone)]
pub enum PipelineMsg {
    /// Begin a new run.
    Start(SnapRecord),
    /// A stage finished with the record it produced.
    Complete { stage: Stage, record: SnapRecord },
}

/// Input side of a stage worker, as seen by the orchestrator.
pub trait StageInbox: Send + Sync {
    fn start(&self, record: SnapRecord) -> Result<(), PipelineError>;
}

/// Lets a stage worker report completions back to the orchestrator.
#[derive(Debug, Clone)]
pub struct StageReporter {
    stage: Stage,
    tx: mpsc::UnboundedSender<PipelineMsg>,
}

impl StageReporter {
    pub fn new(stage: Stage, tx: mpsc::UnboundedSender<PipelineMsg>) -> Self {
        Self { stage, tx }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Emits the terminal event for one accepted `start`.
    pub fn complete(&self, record: SnapRecord) {
        let msg = PipelineMsg::Complete {
            stage: self.stage,
            record,
        };
        if self.tx.send(msg).is_err() {
            tracing::error!("Pipeline is gone, {} completion dropped", self.stage);
        }
    }
}
