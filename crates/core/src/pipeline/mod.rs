//! Pipeline orchestration for capture runs.
//!
//! A run moves a [`SnapRecord`](crate::record::SnapRecord) through four fixed
//! stages: Capture -> Compose -> Thumbnail -> Post. The orchestrator sends
//! `start` to a stage and, when that stage reports completion (tagged with its
//! [`Stage`]), forwards the produced record to the next one.

mod orchestrator;
mod types;

pub use orchestrator::{PipelineHandle, PipelineOrchestrator, StageSet};
pub use types::{PipelineError, PipelineMsg, Stage, StageInbox, StageReporter};
