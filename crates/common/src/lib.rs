//! AnimMUF Common Utilities
//!
//! Shared infrastructure for all AnimMUF crates:
//! - Error taxonomy and result aliases
//! - Clock abstraction for staleness and retention decisions
//! - Tracing/logging initialization
//! - Configuration loading

pub mod clock;
pub mod config;
pub mod error;
pub mod logging;

pub use clock::*;
pub use config::*;
pub use error::*;
