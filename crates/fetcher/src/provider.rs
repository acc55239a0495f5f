//! The provider capability.

use animmuf_common::error::FetchError;
use animmuf_frame_model::{Frame, FrameRef, Listing};
use async_trait::async_trait;

/// Source of MUF frames.
///
/// Implementations must be safe to call from several download workers at
/// once. Tests drive the pipeline with canned implementations.
#[async_trait]
pub trait FrameProvider: Send + Sync {
    /// Current index of available frames. Malformed entries are skipped
    /// and counted in [`Listing::skipped`], never fatal on their own.
    async fn list_available(&self) -> Result<Listing, FetchError>;

    /// Download one listed frame.
    async fn fetch(&self, frame_ref: &FrameRef) -> Result<Frame, FetchError>;

    /// Provider name for logs.
    fn name(&self) -> &str;
}
