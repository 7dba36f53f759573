//! Harvest pipeline: stage sequencing, run configuration and run reporting
//!
//! Stage flow:
//!   combinations → primary (paginated listing) → resolve / item-details
//!   → resolved-details-a / -b → finalize (always)

pub mod config;
pub mod orchestrator;
pub mod report;
pub mod stage;

pub use config::{ConfigError, HarvestConfig, previous_month};
pub use orchestrator::{Orchestrator, Registry, new_run_id};
pub use report::{RunReport, StageStatus, StageSummary};
pub use stage::{RunState, Stage, StageTarget};
