//! AnimMUF Frame Model
//!
//! Defines the data contracts shared by every pipeline stage:
//! - **Frame:** one timestamped MUF map image with its content hash
//! - **Listing:** provider index entries (`FrameRef`) parsed leniently
//! - **FrameSet:** frames in ascending timestamp order with per-pair
//!   interval annotations
//!
//! All timestamps are UTC.

pub mod frame;
pub mod frame_set;
pub mod listing;

pub use frame::*;
pub use frame_set::*;
pub use listing::*;
