//! Stand-in stage worker for orchestrator tests.

use std::sync::{Arc, Mutex};

use crate::pipeline::{PipelineError, StageInbox, StageReporter};
use crate::record::SnapRecord;

/// Records every record it is started with and, when built with
/// [`RecordingStage::completing`], completes it unchanged right away.
#[derive(Debug, Clone, Default)]
pub struct RecordingStage {
    received: Arc<Mutex<Vec<SnapRecord>>>,
    reporter: Option<StageReporter>,
}

impl RecordingStage {
    /// A stage that never completes.
    pub fn new() -> Self {
        Self::default()
    }

    /// A stage that completes every start through `reporter`.
    pub fn completing(reporter: StageReporter) -> Self {
        Self {
            received: Arc::default(),
            reporter: Some(reporter),
        }
    }

    /// Records received so far, in arrival order.
    pub fn received(&self) -> Vec<SnapRecord> {
        self.received.lock().expect("recording stage lock poisoned").clone()
    }
}

impl StageInbox for RecordingStage {
    fn start(&self, record: SnapRecord) -> Result<(), PipelineError> {
        self.received
            .lock()
            .expect("recording stage lock poisoned")
            .push(record.clone());
        if let Some(reporter) = &self.reporter {
            reporter.complete(record);
        }
        Ok(())
    }
}
