//! AnimMUF Pipeline
//!
//! Drives one run through its stages:
//!
//! ```text
//! Idle → Fetching → Sequencing → Assembling → Converting → Done
//! ```
//!
//! with `Failed(stage, reason)` reachable from every working stage.
//!
//! - **Fetching:** prune the cache, list the provider, download missing
//!   frames on a bounded worker pool (transient errors retried with
//!   backoff, gone frames recorded as gaps), join every worker
//! - **Sequencing:** order, window and gap-check the cached frames
//! - **Assembling:** render the intermediate GIF
//! - **Converting:** run the external converter and validate its output
//!
//! A stop flag is checked before each download and at every stage
//! boundary. Runs are never retried internally.

mod fetch;
pub mod orchestrator;
pub mod state;

pub use orchestrator::Pipeline;
pub use state::{FailureReason, FetchSummary, PipelineResult, PipelineState, PipelineStatus, Stage};
