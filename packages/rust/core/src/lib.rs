//! Taxonomy stages built on clustering output, and the orchestrator.
//!
//! - [`progression`]: seniority transitions inferred from cluster membership
//! - [`mapper`]: clusters to canonical occupation records
//! - [`monitoring`]: fire-and-forget pipeline events
//! - [`pipeline`]: stage state machine with a resumable checkpoint

pub mod mapper;
pub mod monitoring;
pub mod pipeline;
pub mod progression;

pub use mapper::{OccupationMapper, occupation_id};
pub use monitoring::{EventDispatcher, EventStatus, JsonlMonitoringSink, MonitoringEvent, MonitoringSink};
pub use pipeline::{
    Checkpoint, Pipeline, PipelineConfig, PipelineReport, PipelineServices, ProgressReporter,
    SilentProgress, Stage, StageOutcome, StageReport, StageState,
};
pub use progression::{ProgressionDetector, SeniorityLevel, detect_level};
