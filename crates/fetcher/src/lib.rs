//! AnimMUF Fetcher
//!
//! Everything that talks to the data provider:
//! - [`FrameProvider`]: the capability the pipeline depends on
//! - [`HttpProvider`]: the NOAA SWPC implementation over HTTPS, with the
//!   listing cached on disk for `manifest_max_age`
//! - [`RetryPolicy`]: bounded exponential backoff for transient failures
//!
//! Fetching never touches the frame store; persisting is the caller's job.

pub mod http;
pub mod provider;
pub mod retry;

pub use http::HttpProvider;
pub use provider::FrameProvider;
pub use retry::{retry_transient, RetryPolicy};
